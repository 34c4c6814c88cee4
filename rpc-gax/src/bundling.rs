//! Request bundling.
//!
//! Concurrent requests that agree on their discriminator fields are merged
//! into one call. Each request's `bundled_field` array is appended to a
//! group; when a threshold trips (element count, serialized bytes, or the
//! delay since the group's first request) the group is removed from the
//! live set and issued as a single request through the unary path. The
//! response's `subresponse_field` array is then split back out to the
//! members positionally, in the order they joined.
//!
//! The group map is guarded by a synchronous mutex and never held across an
//! await, so locating a group and appending to it happen in one step: a
//! request lands either in the group being flushed or in a fresh one.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::call::UnaryInvoker;
use crate::config::{BundleOptions, CallSettings};
use crate::fields::{self, Message};
use crate::GaxError;

/// Describes how a method's requests are bundled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleDescriptor {
    /// Repeated request field whose elements are concatenated.
    pub bundled_field: String,
    /// Fields that must be equal for two requests to share a bundle.
    pub discriminator_fields: Vec<String>,
    /// Repeated response field split back out to each request. Without one,
    /// every request receives the whole response.
    pub subresponse_field: Option<String>,
}

impl BundleDescriptor {
    pub fn new<I, S>(bundled_field: impl Into<String>, discriminator_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bundled_field: bundled_field.into(),
            discriminator_fields: discriminator_fields.into_iter().map(Into::into).collect(),
            subresponse_field: None,
        }
    }

    pub fn subresponse_field(mut self, field: impl Into<String>) -> Self {
        self.subresponse_field = Some(field.into());
        self
    }
}

/// Compute the bundle key of a request.
///
/// Returns `None` when none of the discriminator fields are present; such a
/// request is not bundleable. Otherwise absent fields are recorded as
/// `null` and the key is the JSON array of the values in field order. A
/// field that is present with an explicit `null` counts as present, so it
/// groups with requests that omit the field.
///
/// ```
/// use rpc_gax::bundling::compute_bundle_id;
/// use serde_json::json;
///
/// let fields = vec!["topic".to_string(), "region".to_string()];
/// assert_eq!(
///     compute_bundle_id(&json!({"topic": "t1"}), &fields).as_deref(),
///     Some(r#"["t1",null]"#),
/// );
/// assert_eq!(compute_bundle_id(&json!({"other": 1}), &fields), None);
/// assert_eq!(
///     compute_bundle_id(&json!({"topic": null}), &fields).as_deref(),
///     Some("[null,null]"),
/// );
/// ```
pub fn compute_bundle_id(request: &Value, discriminator_fields: &[String]) -> Option<String> {
    let mut present = false;
    let values: Vec<Value> = discriminator_fields
        .iter()
        .map(|field| match fields::lookup(request, field) {
            Some(value) => {
                present = true;
                value.clone()
            }
            None => Value::Null,
        })
        .collect();
    if !present {
        return None;
    }
    Some(Value::Array(values).to_string())
}

struct Entry<Res> {
    id: u64,
    request: Value,
    element_count: usize,
    byte_size: usize,
    tx: oneshot::Sender<Result<Res, GaxError>>,
}

struct Group<Res> {
    id: u64,
    entries: Vec<Entry<Res>>,
    element_count: usize,
    byte_count: usize,
    /// Settings of the first member; the merged request is issued with them.
    settings: CallSettings,
}

struct State<Res> {
    groups: HashMap<String, Group<Res>>,
    next_id: u64,
}

impl<Res> State<Res> {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Owns the pending bundles of one method.
pub struct BundleExecutor<Req, Res> {
    invoker: Arc<UnaryInvoker<Req, Res>>,
    descriptor: BundleDescriptor,
    options: BundleOptions,
    state: Mutex<State<Res>>,
}

impl<Req: Message, Res: Message> BundleExecutor<Req, Res> {
    pub(crate) fn new(
        invoker: Arc<UnaryInvoker<Req, Res>>,
        descriptor: BundleDescriptor,
        options: BundleOptions,
    ) -> Self {
        Self {
            invoker,
            descriptor,
            options,
            state: Mutex::new(State {
                groups: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<Res>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn descriptor(&self) -> &BundleDescriptor {
        &self.descriptor
    }

    /// Number of requests waiting in unflushed groups.
    pub fn pending(&self) -> usize {
        self.lock().groups.values().map(|g| g.entries.len()).sum()
    }

    /// Enqueue `request`, or issue it directly when it cannot be bundled.
    ///
    /// Enqueueing happens before this returns, so submission order is call
    /// order. Dropping the returned future before its group is flushed
    /// removes the request from the group.
    pub fn schedule(
        self: &Arc<Self>,
        request: Req,
        settings: CallSettings,
    ) -> BoxFuture<'static, Result<Res, GaxError>> {
        let value = match fields::to_value(&request) {
            Ok(value) => value,
            Err(err) => return Box::pin(futures::future::ready(Err(err))),
        };
        let key = match compute_bundle_id(&value, &self.descriptor.discriminator_fields) {
            Some(key) if settings.bundling_enabled => key,
            _ => {
                let invoker = self.invoker.clone();
                return Box::pin(async move { invoker.invoke(request, &settings).await });
            }
        };
        match self.enqueue(key, value, settings) {
            Ok(pending) => Box::pin(pending),
            Err(err) => Box::pin(futures::future::ready(Err(err))),
        }
    }

    fn enqueue(
        self: &Arc<Self>,
        key: String,
        request: Value,
        settings: CallSettings,
    ) -> Result<PendingCall<Req, Res>, GaxError> {
        let element_count = match fields::get_field(&request, &self.descriptor.bundled_field) {
            Some(Value::Array(elements)) => elements.len(),
            _ => {
                return Err(GaxError::invalid_argument(format!(
                    "bundled field {} is missing or not a list",
                    self.descriptor.bundled_field
                )));
            }
        };
        let byte_size = serde_json::to_vec(&request)
            .map_err(|e| GaxError::Encode(format!("JSON encoding failed: {}", e)))?
            .len();
        if let Some(limit) = self.options.element_count_limit {
            if element_count > limit {
                return Err(GaxError::invalid_argument(format!(
                    "request has {} elements, more than the bundle limit of {}",
                    element_count, limit
                )));
            }
        }
        if let Some(limit) = self.options.request_byte_limit {
            if byte_size > limit {
                return Err(GaxError::invalid_argument(format!(
                    "request is {} bytes, more than the bundle limit of {}",
                    byte_size, limit
                )));
            }
        }

        let (tx, rx) = oneshot::channel();
        let mut to_flush = Vec::new();
        let entry_id;
        {
            let mut state = self.lock();

            // An addition that would overflow a limit closes the current group.
            let overflows = state.groups.get(&key).is_some_and(|group| {
                self.options
                    .element_count_limit
                    .is_some_and(|l| group.element_count + element_count > l)
                    || self
                        .options
                        .request_byte_limit
                        .is_some_and(|l| group.byte_count + byte_size > l)
            });
            if overflows {
                if let Some(group) = state.groups.remove(&key) {
                    to_flush.push((key.clone(), group));
                }
            }

            entry_id = state.next_id();
            let group_id = match state.groups.get(&key) {
                Some(group) => group.id,
                None => {
                    let id = state.next_id();
                    state.groups.insert(
                        key.clone(),
                        Group {
                            id,
                            entries: Vec::new(),
                            element_count: 0,
                            byte_count: 0,
                            settings,
                        },
                    );
                    id
                }
            };
            let (is_first, tripped) = match state.groups.get_mut(&key) {
                Some(group) => {
                    group.entries.push(Entry {
                        id: entry_id,
                        request,
                        element_count,
                        byte_size,
                        tx,
                    });
                    group.element_count += element_count;
                    group.byte_count += byte_size;
                    (group.entries.len() == 1, self.threshold_reached(group))
                }
                None => (false, false),
            };

            if tripped {
                if let Some(group) = state.groups.remove(&key) {
                    to_flush.push((key.clone(), group));
                }
            } else if is_first {
                self.start_timer(key.clone(), group_id);
            }
        }

        for (key, group) in to_flush {
            self.spawn_flush(key, group);
        }

        Ok(PendingCall {
            rx,
            _guard: PendingGuard {
                executor: Arc::clone(self),
                key,
                entry_id,
            },
        })
    }

    fn threshold_reached(&self, group: &Group<Res>) -> bool {
        let count = self.options.element_count_threshold;
        let bytes = self.options.request_byte_threshold;
        (count > 0 && group.element_count >= count) || (bytes > 0 && group.byte_count >= bytes)
    }

    fn start_timer(self: &Arc<Self>, key: String, group_id: u64) {
        let executor = Arc::clone(self);
        let delay = self.options.delay_threshold;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let group = {
                let mut state = executor.lock();
                match state.groups.get(&key) {
                    // The group this timer was started for may already be gone.
                    Some(group) if group.id == group_id => state.groups.remove(&key),
                    _ => None,
                }
            };
            if let Some(group) = group {
                executor.spawn_flush(key, group);
            }
        });
    }

    /// Flush the group for `bundle_id` now. Returns whether one was pending.
    pub fn flush(self: &Arc<Self>, bundle_id: &str) -> bool {
        let group = self.lock().groups.remove(bundle_id);
        match group {
            Some(group) => {
                self.spawn_flush(bundle_id.to_string(), group);
                true
            }
            None => false,
        }
    }

    /// Flush every pending group now.
    pub fn flush_all(self: &Arc<Self>) {
        let groups: Vec<_> = self.lock().groups.drain().collect();
        for (key, group) in groups {
            self.spawn_flush(key, group);
        }
    }

    fn spawn_flush(self: &Arc<Self>, key: String, group: Group<Res>) {
        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.run_flush(key, group).await });
    }

    async fn run_flush(&self, key: String, group: Group<Res>) {
        let Group {
            entries, settings, ..
        } = group;
        if entries.is_empty() {
            return;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %self.invoker.method(),
            bundle_id = %key,
            requests = entries.len(),
            "flushing bundle"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = key;

        let result = match self.merge(&entries) {
            Ok(request) => self.invoker.invoke(request, &settings).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(response) => self.deliver(entries, response),
            Err(err) => {
                for entry in entries {
                    let _ = entry.tx.send(Err(err.clone()));
                }
            }
        }
    }

    fn merge(&self, entries: &[Entry<Res>]) -> Result<Req, GaxError> {
        let mut merged = entries[0].request.clone();
        let elements: Vec<Value> = entries
            .iter()
            .filter_map(|entry| match fields::get_field(&entry.request, &self.descriptor.bundled_field) {
                Some(Value::Array(elements)) => Some(elements.iter().cloned()),
                _ => None,
            })
            .flatten()
            .collect();
        fields::set_field(&mut merged, &self.descriptor.bundled_field, Value::Array(elements));
        fields::from_value(merged)
    }

    fn deliver(&self, entries: Vec<Entry<Res>>, response: Res) {
        let Some(subresponse_field) = &self.descriptor.subresponse_field else {
            for entry in entries {
                let _ = entry.tx.send(Ok(response.clone()));
            }
            return;
        };
        let value = match fields::to_value(&response) {
            Ok(value) => value,
            Err(err) => {
                for entry in entries {
                    let _ = entry.tx.send(Err(err.clone()));
                }
                return;
            }
        };
        let subresponses = match fields::get_field(&value, subresponse_field) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };

        let mut offset = 0;
        for entry in entries {
            let start = offset.min(subresponses.len());
            let end = (offset + entry.element_count).min(subresponses.len());
            offset += entry.element_count;

            let mut own = value.clone();
            fields::set_field(
                &mut own,
                subresponse_field,
                Value::Array(subresponses[start..end].to_vec()),
            );
            let _ = entry.tx.send(fields::from_value(own));
        }
    }

    fn remove_entry(&self, key: &str, entry_id: u64) {
        let mut state = self.lock();
        let Some(group) = state.groups.get_mut(key) else {
            return;
        };
        let Some(index) = group.entries.iter().position(|e| e.id == entry_id) else {
            return;
        };
        let entry = group.entries.remove(index);
        group.element_count -= entry.element_count;
        group.byte_count -= entry.byte_size;
        if group.entries.is_empty() {
            state.groups.remove(key);
        }
    }
}

struct PendingGuard<Req: Message, Res: Message> {
    executor: Arc<BundleExecutor<Req, Res>>,
    key: String,
    entry_id: u64,
}

impl<Req: Message, Res: Message> Drop for PendingGuard<Req, Res> {
    fn drop(&mut self) {
        // No-op once the entry has been taken by a flush.
        self.executor.remove_entry(&self.key, self.entry_id);
    }
}

/// A bundled request awaiting its share of the response.
struct PendingCall<Req: Message, Res: Message> {
    rx: oneshot::Receiver<Result<Res, GaxError>>,
    _guard: PendingGuard<Req, Res>,
}

impl<Req: Message, Res: Message> Future for PendingCall<Req, Res> {
    type Output = Result<Res, GaxError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(result) => result,
            Err(_) => Err(GaxError::cancelled("bundle dropped before it was flushed")),
        })
    }
}
