//! Token-based pagination.
//!
//! A paged method takes a page token in its request and returns the next
//! token alongside a repeated resource field. [`Pages`] walks that chain
//! lazily, one unary call per page; an empty or absent next token ends it.
//!
//! # Example
//!
//! ```ignore
//! use futures::TryStreamExt;
//!
//! let books: Vec<Book> = list_books
//!     .items::<Book>(ListBooksRequest { parent: "shelves/1".into(), ..Default::default() }, None)?
//!     .try_collect()
//!     .await?;
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::call::UnaryInvoker;
use crate::config::CallSettings;
use crate::fields::{self, Message};
use crate::GaxError;

/// Names the fields that carry paging state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageDescriptor {
    pub request_page_token_field: String,
    pub response_page_token_field: String,
    pub resource_field: String,
    /// Request field that receives [`CallOptions::page_size`](crate::CallOptions::page_size).
    pub request_page_size_field: Option<String>,
}

impl PageDescriptor {
    pub fn new(
        request_page_token_field: impl Into<String>,
        response_page_token_field: impl Into<String>,
        resource_field: impl Into<String>,
    ) -> Self {
        Self {
            request_page_token_field: request_page_token_field.into(),
            response_page_token_field: response_page_token_field.into(),
            resource_field: resource_field.into(),
            request_page_size_field: Some("page_size".to_string()),
        }
    }

    pub fn page_size_field(mut self, field: Option<impl Into<String>>) -> Self {
        self.request_page_size_field = field.map(Into::into);
        self
    }
}

/// A lazy sequence of response pages.
pub struct Pages<Req, Res> {
    invoker: Arc<UnaryInvoker<Req, Res>>,
    settings: CallSettings,
    descriptor: PageDescriptor,
    request: Req,
    next_token: Option<String>,
    done: bool,
}

impl<Req: Message, Res: Message> Pages<Req, Res> {
    pub(crate) fn new(
        invoker: Arc<UnaryInvoker<Req, Res>>,
        settings: CallSettings,
        descriptor: PageDescriptor,
        request: Req,
    ) -> Self {
        let next_token = settings.page_token.clone();
        Self {
            invoker,
            settings,
            descriptor,
            request,
            next_token,
            done: false,
        }
    }

    /// The token the next page will be requested with.
    ///
    /// Passing it as [`CallOptions::page_token`](crate::CallOptions::page_token)
    /// to a later call resumes the sequence from the same point.
    pub fn next_page_token(&self) -> Option<&str> {
        self.next_token.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    fn page_request(&self) -> Result<Req, GaxError> {
        let mut value = fields::to_value(&self.request)?;
        if let Some(token) = &self.next_token {
            fields::set_field(
                &mut value,
                &self.descriptor.request_page_token_field,
                Value::String(token.clone()),
            );
        }
        if let (Some(size), Some(field)) =
            (self.settings.page_size, &self.descriptor.request_page_size_field)
        {
            fields::set_field(&mut value, field, Value::from(size));
        }
        fields::from_value(value).map_err(|e| GaxError::Encode(e.to_string()))
    }

    /// Fetch the next page, or `None` once the sequence is exhausted.
    ///
    /// An error ends the sequence.
    pub async fn next_page(&mut self) -> Result<Option<Res>, GaxError> {
        if self.done {
            return Ok(None);
        }
        let result = self.fetch().await;
        if result.is_err() {
            self.done = true;
        }
        result.map(Some)
    }

    async fn fetch(&mut self) -> Result<Res, GaxError> {
        let request = self.page_request()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %self.invoker.method(),
            page_token = self.next_token.as_deref().unwrap_or(""),
            "fetching page"
        );
        let response = self.invoker.invoke(request, &self.settings).await?;
        let value = fields::to_value(&response)?;
        let token = fields::get_field(&value, &self.descriptor.response_page_token_field)
            .and_then(fields::scalar_to_string)
            .filter(|token| !token.is_empty());
        self.done = token.is_none();
        self.next_token = token;
        Ok(response)
    }

    pub fn into_stream(self) -> BoxStream<'static, Result<Res, GaxError>> {
        stream::unfold(self, |mut pages| async move {
            match pages.next_page().await {
                Ok(Some(page)) => Some((Ok(page), pages)),
                Ok(None) => None,
                Err(err) => Some((Err(err), pages)),
            }
        })
        .boxed()
    }

    /// Flatten the pages into their resources, stopping after
    /// `max_results` items when set. With auto-pagination off only the first
    /// page is fetched.
    pub fn into_items<T>(self) -> BoxStream<'static, Result<T, GaxError>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let resource_field = self.descriptor.resource_field.clone();
        let max_results = self.settings.max_results;
        let single_page = !self.settings.auto_paginate;
        let state = ItemState {
            pages: self,
            buffered: VecDeque::new(),
            resource_field,
        };
        let items = stream::unfold(state, move |mut state| async move {
            loop {
                if let Some(item) = state.buffered.pop_front() {
                    let item = fields::from_value::<T>(item);
                    return Some((item, state));
                }
                match state.pages.next_page().await {
                    Ok(Some(page)) => match fields::to_value(&page) {
                        Ok(value) => {
                            if single_page {
                                state.pages.done = true;
                            }
                            if let Some(Value::Array(resources)) =
                                fields::get_field(&value, &state.resource_field)
                            {
                                state.buffered.extend(resources.iter().cloned());
                            }
                        }
                        Err(err) => return Some((Err(err), state)),
                    },
                    Ok(None) => return None,
                    Err(err) => return Some((Err(err), state)),
                }
            }
        });
        match max_results {
            Some(max) => items.take(max).boxed(),
            None => items.boxed(),
        }
    }
}

struct ItemState<Req, Res> {
    pages: Pages<Req, Res>,
    buffered: VecDeque<Value>,
    resource_field: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallContext;
    use crate::config::CallOptions;
    use futures::TryStreamExt;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Clone, Debug, Default, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ListRequest {
        parent: String,
        #[serde(default)]
        page_token: String,
        #[serde(default)]
        page_size: u64,
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ListResponse {
        books: Vec<String>,
        next_page_token: String,
    }

    /// Serves `total` books, `per_page` at a time, recording each request.
    fn book_server(
        total: usize,
        per_page: usize,
        log: Arc<Mutex<Vec<ListRequest>>>,
    ) -> Arc<UnaryInvoker<ListRequest, ListResponse>> {
        let raw = move |req: ListRequest, _ctx: CallContext| {
            log.lock().unwrap().push(req.clone());
            async move {
                let start: usize = if req.page_token.is_empty() {
                    0
                } else {
                    req.page_token.parse().unwrap()
                };
                let end = (start + per_page).min(total);
                let books = (start..end).map(|i| format!("book-{}", i)).collect();
                let next_page_token = if end < total { end.to_string() } else { String::new() };
                Ok::<_, GaxError>(ListResponse {
                    books,
                    next_page_token,
                })
            }
        };
        Arc::new(UnaryInvoker::new(
            "library/ListBooks".to_string(),
            Arc::new(raw),
            Arc::new(()),
        ))
    }

    fn descriptor() -> PageDescriptor {
        PageDescriptor::new("page_token", "next_page_token", "books")
    }

    fn request() -> ListRequest {
        ListRequest {
            parent: "shelves/1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pages_follow_tokens() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = book_server(5, 2, log.clone());
        let mut pages = Pages::new(invoker, CallSettings::new(), descriptor(), request());

        let first = pages.next_page().await.unwrap().unwrap();
        assert_eq!(first.books, vec!["book-0", "book-1"]);
        assert_eq!(pages.next_page_token(), Some("2"));

        let rest: Vec<_> = pages.into_stream().try_collect().await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[1].books, vec!["book-4"]);

        let log = log.lock().unwrap();
        let tokens: Vec<_> = log.iter().map(|r| r.page_token.as_str()).collect();
        assert_eq!(tokens, vec!["", "2", "4"]);
        assert!(log.iter().all(|r| r.parent == "shelves/1"));
    }

    #[tokio::test]
    async fn test_items_with_page_size_token_and_max_results() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = book_server(10, 3, log.clone());
        let settings = CallSettings::new().merge(Some(
            &CallOptions::new().page_token("3").page_size(3).max_results(4),
        ));
        let pages = Pages::new(invoker, settings, descriptor(), request());

        let items: Vec<String> = pages.into_items().try_collect().await.unwrap();
        assert_eq!(items, vec!["book-3", "book-4", "book-5", "book-6"]);

        let log = log.lock().unwrap();
        // 4 items from pages of 3 need exactly two fetches
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].page_token, "3");
        assert_eq!(log[0].page_size, 3);
    }

    #[tokio::test]
    async fn test_items_without_auto_paginate_stop_after_first_page() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = book_server(5, 2, log.clone());
        let settings =
            CallSettings::new().merge(Some(&CallOptions::new().auto_paginate(false)));
        let pages = Pages::new(invoker, settings, descriptor(), request());

        let items: Vec<String> = pages.into_items().try_collect().await.unwrap();
        assert_eq!(items, vec!["book-0", "book-1"]);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_error_ends_sequence() {
        let raw = |_req: ListRequest, _ctx: CallContext| async {
            Err::<ListResponse, _>(GaxError::not_found("no shelf"))
        };
        let invoker = Arc::new(UnaryInvoker::new(
            "library/ListBooks".to_string(),
            Arc::new(raw),
            Arc::new(()),
        ));
        let mut pages = Pages::new(invoker, CallSettings::new(), descriptor(), request());
        assert!(pages.next_page().await.is_err());
        assert!(pages.is_done());
        assert!(pages.next_page().await.unwrap().is_none());
    }
}
