//! End-to-end tests of wrapped methods over in-memory raw calls.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{StreamExt, stream};
use http::StatusCode;
use rpc_gax::bundling::BundleDescriptor;
use rpc_gax::config::client_config::{ClientConfig, construct_settings};
use rpc_gax::fallback::{FallbackCall, HttpClient};
use rpc_gax::longrunning::{LongRunningDescriptor, OperationProto, OperationsClient};
use rpc_gax::paging::PageDescriptor;
use rpc_gax::streaming::{StreamDescriptor, StreamEvent, StreamKind};
use rpc_gax::transcoding::HttpRule;
use rpc_gax::{
    BackoffSettings, BundleOptions, CallContext, CallOptions, CallSettings, Code, Descriptor,
    GaxError, RawCall, RetryCodes, RetryOptions, StaticHeaders, StreamRequest, TransportEvent,
    wrap, wrap_with_auth,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .try_init();
}

fn fast_backoff() -> BackoffSettings {
    BackoffSettings::new(
        Duration::from_millis(10),
        2.0,
        Duration::from_millis(100),
        Duration::from_secs(1),
        1.0,
        Duration::from_secs(1),
        Duration::from_secs(30),
    )
}

fn retrying() -> CallSettings {
    CallSettings::new().retry(RetryOptions::new(RetryCodes::idempotent(), fast_backoff()))
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetBookRequest {
    name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Book {
    name: String,
    title: String,
}

/// Fails with `code` on odd-numbered calls (1st, 3rd, ...).
fn flaky_get_book(code: Code, calls: Arc<AtomicU32>) -> RawCall<GetBookRequest, Book> {
    RawCall::unary(move |req: GetBookRequest, _ctx: CallContext| {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n % 2 == 1 {
                return Err(GaxError::new(code, "try again"));
            }
            Ok(Book {
                name: req.name,
                title: "Dune".into(),
            })
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_unary_retry_succeeds_on_second_attempt() {
    init_tracing();
    let calls = Arc::new(AtomicU32::new(0));
    let get_book = wrap(
        "library.v1.Library/GetBook",
        flaky_get_book(Code::Unavailable, calls.clone()),
        retrying(),
        Descriptor::None,
    )
    .unwrap();

    let options = CallOptions::new().max_retries(3);
    let book = get_book
        .call(
            GetBookRequest {
                name: "shelves/1/books/1".into(),
            },
            Some(options),
        )
        .await
        .unwrap();
    assert_eq!(book.title, "Dune");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_is_surfaced_unchanged() {
    let calls = Arc::new(AtomicU32::new(0));
    let get_book = wrap(
        "library.v1.Library/GetBook",
        flaky_get_book(Code::PermissionDenied, calls.clone()),
        retrying(),
        Descriptor::None,
    )
    .unwrap();

    let err = get_book.call(GetBookRequest::default(), None).await.unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);
    assert_eq!(err.message(), Some("try again"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retries_stop_at_max_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let raw = RawCall::unary(move |_req: GetBookRequest, _ctx: CallContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Err::<Book, _>(GaxError::unavailable("down")) }
    });
    let get_book = wrap("library.v1.Library/GetBook", raw, retrying(), Descriptor::None).unwrap();

    let err = get_book
        .call(GetBookRequest::default(), Some(CallOptions::new().max_retries(2)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::DeadlineExceeded);
    // initial attempt plus two retries
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_no_retry_option_runs_once() {
    let calls = Arc::new(AtomicU32::new(0));
    let get_book = wrap(
        "library.v1.Library/GetBook",
        flaky_get_book(Code::Unavailable, calls.clone()),
        retrying(),
        Descriptor::None,
    )
    .unwrap();

    let err = get_book
        .call(GetBookRequest::default(), Some(CallOptions::new().no_retry()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unavailable);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // the method's defaults still retry
    assert!(get_book.settings().retry.is_some());
}

#[tokio::test]
async fn test_auth_headers_layer_under_call_headers() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let raw = RawCall::unary(move |req: GetBookRequest, ctx: CallContext| {
        log.lock().unwrap().push(ctx.headers.clone());
        async move {
            Ok::<_, GaxError>(Book {
                name: req.name,
                ..Default::default()
            })
        }
    });
    let get_book = wrap_with_auth(
        "library.v1.Library/GetBook",
        raw,
        CallSettings::new(),
        Descriptor::None,
        StaticHeaders::new("authorization", "Bearer from-auth"),
    )
    .unwrap();

    get_book.call(GetBookRequest::default(), None).await.unwrap();
    get_book
        .call(
            GetBookRequest::default(),
            Some(
                CallOptions::new()
                    .header("authorization", "Bearer explicit")
                    .header("x-goog-request-params", "name=shelves/1"),
            ),
        )
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0]["authorization"], "Bearer from-auth");
    assert_eq!(seen[1]["authorization"], "Bearer explicit");
    assert_eq!(seen[1]["x-goog-request-params"], "name=shelves/1");
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PublishRequest {
    topic: String,
    messages: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PublishResponse {
    message_ids: Vec<String>,
}

#[tokio::test(start_paused = true)]
async fn test_bundled_calls_split_in_submission_order() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let log = calls.clone();
    let raw = RawCall::unary(move |req: PublishRequest, _ctx: CallContext| {
        log.lock().unwrap().push(req.clone());
        async move {
            Ok::<_, GaxError>(PublishResponse {
                message_ids: req.messages.iter().map(|m| format!("id-{}", m)).collect(),
            })
        }
    });
    let settings = CallSettings::new().bundle(BundleOptions::new(
        4,
        0,
        Duration::from_millis(50),
    ));
    let publish = wrap(
        "pubsub.v1.Publisher/Publish",
        raw,
        settings,
        BundleDescriptor::new("messages", ["topic"])
            .subresponse_field("message_ids")
            .into(),
    )
    .unwrap();

    let request = |messages: &[&str]| PublishRequest {
        topic: "topics/books".into(),
        messages: messages.iter().map(|m| m.to_string()).collect(),
    };
    let a = publish.call(request(&["a"]), None);
    let b = publish.call(request(&["b", "c"]), None);
    let c = publish.call(request(&["d"]), None);

    assert_eq!(a.await.unwrap().message_ids, vec!["id-a"]);
    assert_eq!(b.await.unwrap().message_ids, vec!["id-b", "id-c"]);
    assert_eq!(c.await.unwrap().message_ids, vec!["id-d"]);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].messages, vec!["a", "b", "c", "d"]);
}

#[tokio::test(start_paused = true)]
async fn test_bundling_disabled_per_call() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let raw = RawCall::unary(move |req: PublishRequest, _ctx: CallContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            Ok::<_, GaxError>(PublishResponse {
                message_ids: req.messages,
            })
        }
    });
    let settings = CallSettings::new().bundle(BundleOptions::new(
        100,
        0,
        Duration::from_secs(10),
    ));
    let publish = wrap(
        "pubsub.v1.Publisher/Publish",
        raw,
        settings,
        BundleDescriptor::new("messages", ["topic"]).into(),
    )
    .unwrap();

    let response = publish
        .call(
            PublishRequest {
                topic: "topics/books".into(),
                messages: vec!["x".into()],
            },
            Some(CallOptions::new().bundling(false)),
        )
        .await
        .unwrap();
    assert_eq!(response.message_ids, vec!["x"]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(publish.bundler().unwrap().pending(), 0);
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListBooksRequest {
    parent: String,
    page_token: String,
    page_size: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListBooksResponse {
    books: Vec<Book>,
    next_page_token: String,
}

#[tokio::test]
async fn test_paged_method() {
    let raw = RawCall::unary(|req: ListBooksRequest, _ctx: CallContext| async move {
        let start: usize = req.page_token.parse().unwrap_or(0);
        let end = (start + 2).min(5);
        Ok::<_, GaxError>(ListBooksResponse {
            books: (start..end)
                .map(|i| Book {
                    name: format!("{}/books/{}", req.parent, i),
                    title: format!("Book {}", i),
                })
                .collect(),
            next_page_token: if end < 5 { end.to_string() } else { String::new() },
        })
    });
    let list_books = wrap(
        "library.v1.Library/ListBooks",
        raw,
        CallSettings::new(),
        PageDescriptor::new("page_token", "next_page_token", "books").into(),
    )
    .unwrap();
    let request = ListBooksRequest {
        parent: "shelves/1".into(),
        ..Default::default()
    };

    let all: Vec<Book> = list_books.collect_all(request.clone(), None).await.unwrap();
    assert_eq!(all.len(), 5);
    assert_eq!(all[4].name, "shelves/1/books/4");

    let first_page = list_books.call(request.clone(), None).await.unwrap();
    assert_eq!(first_page.books.len(), 2);
    assert_eq!(first_page.next_page_token, "2");

    let resumed: Vec<Book> = list_books
        .collect_all(request, Some(CallOptions::new().page_token("4")))
        .await
        .unwrap();
    assert_eq!(resumed.len(), 1);
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct WatchRequest {
    shelf: String,
    resume_after: Option<u32>,
}

#[tokio::test(start_paused = true)]
async fn test_server_stream_reconnects_transparently() {
    init_tracing();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let log = requests.clone();
    let raw = RawCall::streaming(move |req: StreamRequest<WatchRequest>, _ctx: CallContext| {
        let StreamRequest::Single(req) = req else {
            panic!("watch is server streaming");
        };
        let first = log.lock().unwrap().is_empty();
        log.lock().unwrap().push(req.clone());
        async move {
            let start = req.resume_after.map_or(0, |n| n + 1);
            let mut events: Vec<TransportEvent<u32>> = (start..4).map(TransportEvent::Data).collect();
            if first {
                events.truncate(2);
                events.push(TransportEvent::Error(GaxError::unavailable("connection reset")));
            }
            Ok::<_, GaxError>(stream::iter(events).boxed())
        }
    });
    let descriptor = StreamDescriptor::new(StreamKind::Server).with_resumption(
        |original: &WatchRequest, last: Option<&u32>| WatchRequest {
            resume_after: last.copied(),
            ..original.clone()
        },
    );
    let watch = wrap("library.v1.Library/WatchShelf", raw, retrying(), descriptor.into()).unwrap();

    // unary entry point is not available on a streaming method
    let err = watch.call(WatchRequest::default(), None).await.unwrap_err();
    assert!(matches!(err, GaxError::Config(_)));

    let proxy = watch
        .stream(
            Some(WatchRequest {
                shelf: "shelves/1".into(),
                resume_after: None,
            }),
            None,
        )
        .unwrap();
    let items: Vec<u32> = proxy
        .into_data_stream()
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(items, vec![0, 1, 2, 3]);

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].resume_after, Some(1));
    assert_eq!(requests[1].shelf, "shelves/1");
}

#[tokio::test]
async fn test_client_stream_sums_writes() {
    let raw = RawCall::streaming(|req: StreamRequest<u32>, _ctx: CallContext| async move {
        let StreamRequest::Stream(values) = req else {
            return Err(GaxError::invalid_argument("expected a request stream"));
        };
        let total: u32 = values.fold(0, |acc, v| async move { acc + v }).await;
        Ok(stream::iter(vec![TransportEvent::Data(total)]).boxed())
    });
    let sum = wrap(
        "math.v1.Math/Sum",
        raw,
        CallSettings::new(),
        StreamDescriptor::new(StreamKind::Client).into(),
    )
    .unwrap();

    let mut proxy = sum.stream(None, None).unwrap();
    assert!(!proxy.readable());
    for v in [1, 2, 3] {
        proxy.send(v).await.unwrap();
    }
    proxy.close_send();

    let mut total = None;
    while let Some(event) = proxy.next_event().await {
        match event {
            StreamEvent::Data(v) => total = Some(v),
            StreamEvent::End => break,
            StreamEvent::Error(e) => panic!("unexpected error: {}", e),
            _ => {}
        }
    }
    assert_eq!(total, Some(6));
}

struct DoneAfterOnePoll;

impl OperationsClient for DoneAfterOnePoll {
    fn get_operation(&self, name: &str) -> BoxFuture<'_, Result<OperationProto, GaxError>> {
        let done = OperationProto {
            name: name.to_string(),
            done: true,
            response: Some(json!({"name": "shelves/1/books/9", "title": "Kindred"})),
            ..Default::default()
        };
        Box::pin(async move { Ok(done) })
    }

    fn cancel_operation(&self, _name: &str) -> BoxFuture<'_, Result<(), GaxError>> {
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct RawOperation {
    name: String,
    done: bool,
}

#[tokio::test(start_paused = true)]
async fn test_long_running_method() {
    let raw = RawCall::unary(|_req: Book, _ctx: CallContext| async move {
        Ok::<_, GaxError>(RawOperation {
            name: "operations/42".into(),
            done: false,
        })
    });
    let create_book = wrap(
        "library.v1.Library/CreateBook",
        raw,
        CallSettings::new(),
        LongRunningDescriptor::new(DoneAfterOnePoll).into(),
    )
    .unwrap();

    let operation = create_book.operation(Book::default(), None).await.unwrap();
    assert_eq!(operation.name(), "operations/42");
    assert!(!operation.done());

    let book: Book = operation.wait().await.unwrap();
    assert_eq!(book.title, "Kindred");
}

#[tokio::test(start_paused = true)]
async fn test_client_config_settings_drive_retries() {
    let config = ClientConfig::from_json(
        r#"{
          "interfaces": {
            "library.v1.Library": {
              "retry_codes": {"idempotent": ["UNAVAILABLE"]},
              "retry_params": {
                "default": {
                  "initial_retry_delay_millis": 10,
                  "retry_delay_multiplier": 1.0,
                  "max_retry_delay_millis": 10,
                  "initial_rpc_timeout_millis": 1000,
                  "rpc_timeout_multiplier": 1.0,
                  "max_rpc_timeout_millis": 1000,
                  "total_timeout_millis": 5000
                }
              },
              "methods": {
                "GetBook": {"retry_codes_name": "idempotent", "retry_params_name": "default"}
              }
            }
          }
        }"#,
    )
    .unwrap();
    let mut settings = construct_settings("library.v1.Library", &config, None).unwrap();
    let calls = Arc::new(AtomicU32::new(0));
    let get_book = wrap(
        "library.v1.Library/GetBook",
        flaky_get_book(Code::Unavailable, calls.clone()),
        settings.remove("GetBook").unwrap(),
        Descriptor::None,
    )
    .unwrap();

    assert_eq!(get_book.call(GetBookRequest::default(), None).await.unwrap().title, "Dune");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Answers 503 first, then the book.
#[derive(Default)]
struct RecoveringServer {
    sent: Mutex<Vec<String>>,
}

/// Local handle so the foreign `HttpClient` trait can be implemented (orphan rule).
struct SharedRecoveringServer(Arc<RecoveringServer>);

impl HttpClient for SharedRecoveringServer {
    fn send(
        &self,
        request: http::Request<Bytes>,
    ) -> BoxFuture<'_, Result<http::Response<Bytes>, GaxError>> {
        let mut sent = self.0.sent.lock().unwrap();
        sent.push(request.uri().to_string());
        let (status, body) = if sent.len() == 1 {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                r#"{"error":{"code":503,"message":"overloaded","status":"UNAVAILABLE"}}"#,
            )
        } else {
            (
                StatusCode::OK,
                r#"{"name":"shelves/1/books/2","title":"Beloved"}"#,
            )
        };
        let response = http::Response::builder()
            .status(status)
            .body(Bytes::from_static(body.as_bytes()))
            .map_err(|e| GaxError::Transport(e.to_string()));
        Box::pin(async move { response })
    }
}

#[tokio::test(start_paused = true)]
async fn test_fallback_transport_with_retry() {
    init_tracing();
    let server = Arc::new(RecoveringServer::default());
    let raw = FallbackCall::new(
        "http://library.test",
        vec![HttpRule::get("/v1/{name=shelves/*/books/*}")],
        SharedRecoveringServer(server.clone()),
    )
    .unwrap()
    .into_raw_call::<GetBookRequest, Book>();
    let get_book = wrap("library.v1.Library/GetBook", raw, retrying(), Descriptor::None).unwrap();

    let book = get_book
        .call(
            GetBookRequest {
                name: "shelves/1/books/2".into(),
            },
            None,
        )
        .await
        .unwrap();
    assert_eq!(book.title, "Beloved");

    let sent = server.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0],
        "http://library.test/v1/shelves/1/books/2?$alt=json%3Benum-encoding=int"
    );
}
