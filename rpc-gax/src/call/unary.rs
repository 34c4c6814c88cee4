use std::sync::Arc;

use super::raw::{CallContext, UnaryCall};
use crate::config::{CallSettings, HeaderProvider, layer_headers};
use crate::retry::retry_loop;
use crate::GaxError;

/// The unary path: one raw call driven by the retry controller.
///
/// Paging, bundling and long-running dispatch all issue their calls
/// through this.
pub(crate) struct UnaryInvoker<Req, Res> {
    method: String,
    raw: Arc<dyn UnaryCall<Req, Res>>,
    auth: Arc<dyn HeaderProvider>,
}

impl<Req, Res> UnaryInvoker<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    pub(crate) fn new(
        method: String,
        raw: Arc<dyn UnaryCall<Req, Res>>,
        auth: Arc<dyn HeaderProvider>,
    ) -> Self {
        Self { method, raw, auth }
    }

    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    pub(crate) async fn invoke(&self, request: Req, settings: &CallSettings) -> Result<Res, GaxError> {
        retry_loop(settings.retry.clone(), settings.timeout, |attempt| {
            let request = request.clone();
            async move {
                // Fetched per attempt so refreshed credentials are picked up.
                let provided = self.auth.headers(&self.method).await?;
                let ctx = CallContext {
                    method: self.method.clone(),
                    headers: layer_headers(provided, &settings.headers),
                    timeout: attempt.timeout,
                    attempt: attempt.number,
                };
                self.raw.call(request, ctx).await
            }
        })
        .await
    }
}
