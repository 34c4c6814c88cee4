//! Long-running operations.
//!
//! A long-running method returns an operation message immediately; the
//! actual result appears on it once the server marks it done. [`Operation`]
//! wraps that message and polls an [`OperationsClient`] until completion.

use std::sync::Arc;

use futures::future::BoxFuture;
use rpc_gax_core::StatusBody;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::backoff::grow;
use crate::config::PollingSettings;
use crate::fields::{self, Message};
use crate::GaxError;

/// The operation message as it appears on the wire.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProto {
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StatusBody>,
}

impl OperationProto {
    /// Project any operation-shaped response message.
    pub fn from_message<M: Message>(message: &M) -> Result<Self, GaxError> {
        fields::from_value(fields::to_value(message)?)
    }
}

/// The operations service collaborator used for polling.
pub trait OperationsClient: Send + Sync + 'static {
    fn get_operation(&self, name: &str) -> BoxFuture<'_, Result<OperationProto, GaxError>>;

    fn cancel_operation(&self, name: &str) -> BoxFuture<'_, Result<(), GaxError>>;
}

/// Marks a method whose response is an operation.
#[derive(Clone)]
pub struct LongRunningDescriptor {
    pub(crate) operations: Arc<dyn OperationsClient>,
}

impl LongRunningDescriptor {
    pub fn new<C: OperationsClient>(operations: C) -> Self {
        Self {
            operations: Arc::new(operations),
        }
    }

    pub fn from_arc(operations: Arc<dyn OperationsClient>) -> Self {
        Self { operations }
    }
}

impl std::fmt::Debug for LongRunningDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongRunningDescriptor").finish_non_exhaustive()
    }
}

/// Handle over one long-running operation.
pub struct Operation {
    latest: OperationProto,
    operations: Arc<dyn OperationsClient>,
    polling: PollingSettings,
}

impl Operation {
    pub fn new(
        latest: OperationProto,
        operations: Arc<dyn OperationsClient>,
        polling: PollingSettings,
    ) -> Self {
        Self {
            latest,
            operations,
            polling,
        }
    }

    pub fn name(&self) -> &str {
        &self.latest.name
    }

    pub fn done(&self) -> bool {
        self.latest.done
    }

    /// The most recently observed operation message.
    pub fn latest(&self) -> &OperationProto {
        &self.latest
    }

    /// Decode the operation metadata, if any has been reported.
    pub fn metadata<T: DeserializeOwned>(&self) -> Option<Result<T, GaxError>> {
        self.latest.metadata.clone().map(fields::from_value)
    }

    /// The outcome, once the operation is done.
    pub fn result<T: DeserializeOwned>(&self) -> Option<Result<T, GaxError>> {
        if !self.latest.done {
            return None;
        }
        if let Some(error) = &self.latest.error {
            return Some(Err(error.clone().into_status(false, 500).into()));
        }
        let response = self.latest.response.clone().unwrap_or(Value::Object(Default::default()));
        Some(fields::from_value(response))
    }

    /// Fetch the latest state once. A finished operation is not fetched
    /// again.
    pub async fn poll_once(&mut self) -> Result<&OperationProto, GaxError> {
        if !self.latest.done {
            #[cfg(feature = "tracing")]
            tracing::debug!(operation = %self.latest.name, "polling operation");
            self.latest = self.operations.get_operation(&self.latest.name).await?;
        }
        Ok(&self.latest)
    }

    /// Poll until the operation is done and decode its response.
    ///
    /// Polls follow the polling backoff; once the next wait would pass the
    /// polling total timeout the wait fails with `DeadlineExceeded`.
    pub async fn wait<T: DeserializeOwned>(mut self) -> Result<T, GaxError> {
        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            if let Some(result) = self.result() {
                return result;
            }
            let delay = grow(
                self.polling.initial_delay,
                self.polling.delay_multiplier,
                self.polling.max_delay,
                attempt,
            );
            if let Some(total) = self.polling.total_timeout {
                if started.elapsed() + delay > total {
                    return Err(GaxError::deadline_exceeded(format!(
                        "operation {} did not complete within {}ms",
                        self.latest.name,
                        total.as_millis()
                    )));
                }
            }
            tokio::time::sleep(delay).await;
            attempt += 1;
            self.poll_once().await?;
        }
    }

    /// Ask the server to cancel the operation.
    pub async fn cancel(&self) -> Result<(), GaxError> {
        self.operations.cancel_operation(&self.latest.name).await
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("latest", &self.latest)
            .field("polling", &self.polling)
            .finish_non_exhaustive()
    }
}
