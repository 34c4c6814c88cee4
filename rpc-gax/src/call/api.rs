use std::future::Future;
use std::sync::Arc;

use futures::TryStreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;

use super::descriptor::Descriptor;
use super::handle::{CallHandle, Canceller};
use super::raw::RawCall;
use super::unary::UnaryInvoker;
use crate::bundling::{BundleDescriptor, BundleExecutor};
use crate::config::{CallOptions, CallSettings, HeaderProvider};
use crate::fields::Message;
use crate::longrunning::{LongRunningDescriptor, Operation, OperationProto};
use crate::paging::{PageDescriptor, Pages};
use crate::streaming::{StreamDescriptor, StreamInvoker, StreamProxy};
use crate::GaxError;

/// Per-descriptor handler, chosen once in [`wrap_with_auth`].
enum Dispatch<Req, Res> {
    Unary(Arc<UnaryInvoker<Req, Res>>),
    Page {
        invoker: Arc<UnaryInvoker<Req, Res>>,
        descriptor: PageDescriptor,
    },
    Stream {
        invoker: Arc<StreamInvoker<Req, Res>>,
        descriptor: StreamDescriptor<Req, Res>,
    },
    Bundle(Arc<BundleExecutor<Req, Res>>),
    LongRunning {
        invoker: Arc<UnaryInvoker<Req, Res>>,
        descriptor: LongRunningDescriptor,
    },
}

/// A wrapped method, reusable for any number of invocations.
///
/// Create one per client method with [`wrap`] or [`wrap_with_auth`].
pub struct ApiCall<Req, Res> {
    method: String,
    settings: CallSettings,
    dispatch: Dispatch<Req, Res>,
}

/// Wrap `raw` with the behavior selected by `descriptor`.
///
/// Fails with [`GaxError::Config`] when `settings` do not validate or the
/// raw call's shape does not fit the descriptor.
///
/// # Example
///
/// ```ignore
/// use rpc_gax::{CallSettings, Descriptor, RawCall, wrap};
///
/// let get_book = wrap(
///     "library.v1.Library/GetBook",
///     RawCall::unary(|req: GetBookRequest, ctx| transport.get_book(req, ctx)),
///     CallSettings::new(),
///     Descriptor::None,
/// )?;
///
/// let book = get_book.call(GetBookRequest { name: "shelves/1/books/2".into() }, None).await?;
/// ```
pub fn wrap<Req, Res>(
    method: impl Into<String>,
    raw: RawCall<Req, Res>,
    settings: CallSettings,
    descriptor: Descriptor<Req, Res>,
) -> Result<ApiCall<Req, Res>, GaxError>
where
    Req: Message,
    Res: Message,
{
    wrap_with_auth(method, raw, settings, descriptor, ())
}

/// [`wrap`], with `auth` consulted for headers before every raw call.
pub fn wrap_with_auth<Req, Res, A>(
    method: impl Into<String>,
    raw: RawCall<Req, Res>,
    settings: CallSettings,
    descriptor: Descriptor<Req, Res>,
    auth: A,
) -> Result<ApiCall<Req, Res>, GaxError>
where
    Req: Message,
    Res: Message,
    A: HeaderProvider,
{
    settings.validate()?;
    let method = method.into();
    let auth: Arc<dyn HeaderProvider> = Arc::new(auth);

    let dispatch = match descriptor {
        Descriptor::Stream(descriptor) => {
            let RawCall::Streaming(raw) = raw else {
                return Err(GaxError::Config(format!(
                    "{}: a stream descriptor requires a streaming raw call",
                    method
                )));
            };
            Dispatch::Stream {
                invoker: Arc::new(StreamInvoker::new(method.clone(), raw, auth)),
                descriptor,
            }
        }
        descriptor => {
            let RawCall::Unary(raw) = raw else {
                return Err(GaxError::Config(format!(
                    "{}: a {} method requires a unary raw call",
                    method,
                    descriptor.kind()
                )));
            };
            let invoker = Arc::new(UnaryInvoker::new(method.clone(), raw, auth));
            match descriptor {
                Descriptor::Page(descriptor) => Dispatch::Page {
                    invoker,
                    descriptor,
                },
                Descriptor::Bundle(descriptor) => bundle_dispatch(invoker, descriptor, &settings),
                Descriptor::LongRunning(descriptor) => Dispatch::LongRunning {
                    invoker,
                    descriptor,
                },
                Descriptor::None | Descriptor::Stream(_) => Dispatch::Unary(invoker),
            }
        }
    };

    Ok(ApiCall {
        method,
        settings,
        dispatch,
    })
}

/// Bundling only applies when the settings carry bundle options.
fn bundle_dispatch<Req: Message, Res: Message>(
    invoker: Arc<UnaryInvoker<Req, Res>>,
    descriptor: BundleDescriptor,
    settings: &CallSettings,
) -> Dispatch<Req, Res> {
    match &settings.bundle {
        Some(options) => Dispatch::Bundle(Arc::new(BundleExecutor::new(
            invoker,
            descriptor,
            options.clone(),
        ))),
        None => Dispatch::Unary(invoker),
    }
}

impl<Req: Message, Res: Message> ApiCall<Req, Res> {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The method's default settings.
    pub fn settings(&self) -> &CallSettings {
        &self.settings
    }

    fn spawn<T, Fut>(&self, _rpc_type: &'static str, execution: Fut) -> CallHandle<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, GaxError>> + Send + 'static,
    {
        #[cfg(feature = "tracing")]
        let execution = tracing::Instrument::instrument(
            execution,
            tracing::info_span!(
                "rpc.call",
                rpc.method = %self.method,
                rpc.type = _rpc_type,
                otel.kind = "client",
            ),
        );
        CallHandle::spawn(execution)
    }

    /// Invoke the method once.
    ///
    /// Unary, paged (one page) and long-running methods go through the retry
    /// controller; bundled methods join a bundle before this returns. The
    /// call runs whether or not the handle is awaited.
    pub fn call(&self, request: Req, options: Option<CallOptions>) -> CallHandle<Res> {
        let settings = match self.merged(options.as_ref()) {
            Ok(settings) => settings,
            Err(err) => return CallHandle::failed(err),
        };
        match &self.dispatch {
            Dispatch::Unary(invoker)
            | Dispatch::Page { invoker, .. }
            | Dispatch::LongRunning { invoker, .. } => {
                let invoker = Arc::clone(invoker);
                self.spawn("unary", async move { invoker.invoke(request, &settings).await })
            }
            Dispatch::Bundle(executor) => {
                let pending = executor.schedule(request, settings);
                self.spawn("bundle", pending)
            }
            Dispatch::Stream { .. } => CallHandle::failed(GaxError::Config(format!(
                "{} is a streaming method; use stream()",
                self.method
            ))),
        }
    }

    /// [`call`](Self::call), delivering the result to `callback`.
    pub fn call_with_callback<F>(
        &self,
        request: Req,
        options: Option<CallOptions>,
        callback: F,
    ) -> Canceller
    where
        F: FnOnce(Result<Res, GaxError>) + Send + 'static,
    {
        self.call(request, options).on_complete(callback)
    }

    /// Open a streaming call. Server streams require `request`.
    pub fn stream(
        &self,
        request: Option<Req>,
        options: Option<CallOptions>,
    ) -> Result<StreamProxy<Req, Res>, GaxError> {
        let Dispatch::Stream {
            invoker,
            descriptor,
        } = &self.dispatch
        else {
            return Err(self.not_a("streaming"));
        };
        let settings = self.merged(options.as_ref())?;
        StreamProxy::start(Arc::clone(invoker), descriptor, request, settings)
    }

    /// Lazily walk the pages of a paged method.
    pub fn pages(
        &self,
        request: Req,
        options: Option<CallOptions>,
    ) -> Result<Pages<Req, Res>, GaxError> {
        let Dispatch::Page {
            invoker,
            descriptor,
        } = &self.dispatch
        else {
            return Err(self.not_a("paged"));
        };
        let settings = self.merged(options.as_ref())?;
        Ok(Pages::new(
            Arc::clone(invoker),
            settings,
            descriptor.clone(),
            request,
        ))
    }

    /// Lazily walk the resources of a paged method.
    pub fn items<T>(
        &self,
        request: Req,
        options: Option<CallOptions>,
    ) -> Result<BoxStream<'static, Result<T, GaxError>>, GaxError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        Ok(self.pages(request, options)?.into_items())
    }

    /// Gather the resources of a paged method: every page when
    /// auto-pagination is on, otherwise the first page.
    pub async fn collect_all<T>(
        &self,
        request: Req,
        options: Option<CallOptions>,
    ) -> Result<Vec<T>, GaxError>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.items(request, options)?.try_collect().await
    }

    /// Start a long-running operation.
    pub fn operation(&self, request: Req, options: Option<CallOptions>) -> CallHandle<Operation> {
        let Dispatch::LongRunning {
            invoker,
            descriptor,
        } = &self.dispatch
        else {
            return CallHandle::failed(self.not_a("long-running"));
        };
        let settings = match self.merged(options.as_ref()) {
            Ok(settings) => settings,
            Err(err) => return CallHandle::failed(err),
        };
        let invoker = Arc::clone(invoker);
        let operations = Arc::clone(&descriptor.operations);
        self.spawn("unary", async move {
            let response = invoker.invoke(request, &settings).await?;
            let latest = OperationProto::from_message(&response)?;
            Ok(Operation::new(latest, operations, settings.polling))
        })
    }

    /// The bundle executor, when the method bundles.
    pub fn bundler(&self) -> Option<&Arc<BundleExecutor<Req, Res>>> {
        match &self.dispatch {
            Dispatch::Bundle(executor) => Some(executor),
            _ => None,
        }
    }

    /// Flush every pending bundle now. No effect on other methods.
    pub fn flush_all(&self) {
        if let Some(executor) = self.bundler() {
            executor.flush_all();
        }
    }

    /// Per-call options over the defaults, rejected when the result is
    /// not a usable configuration.
    fn merged(&self, options: Option<&CallOptions>) -> Result<CallSettings, GaxError> {
        let settings = self.settings.merge(options);
        settings
            .validate()
            .map_err(|e| GaxError::Config(format!("{}: invalid call options: {}", self.method, e)))?;
        Ok(settings)
    }

    fn not_a(&self, kind: &str) -> GaxError {
        GaxError::Config(format!("{} is not a {} method", self.method, kind))
    }
}

impl<Req, Res> std::fmt::Debug for ApiCall<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.dispatch {
            Dispatch::Unary(_) => "unary",
            Dispatch::Page { .. } => "page",
            Dispatch::Stream { .. } => "stream",
            Dispatch::Bundle(_) => "bundle",
            Dispatch::LongRunning { .. } => "long_running",
        };
        f.debug_struct("ApiCall")
            .field("method", &self.method)
            .field("dispatch", &kind)
            .field("settings", &self.settings)
            .finish()
    }
}
