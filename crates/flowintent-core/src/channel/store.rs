//! FlowStore: keyed value flows shared between a launching screen and the
//! screen it launched.
//!
//! Each flow is a latest-value cell: subscribers first see the most recent
//! emission (if any) and then every later one. Rapid emissions may be
//! coalesced for a slow subscriber, which only ever misses intermediate values.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::deeplink::ParamSet;
use crate::error::FlowIntentError;
use crate::models::{LaunchRequest, FLOW_ID_EXTRA};

/// Identifier of one value flow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowId(String);

impl FlowId {
    fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FlowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One emitted key/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleData {
    pub key: String,
    pub value: Value,
}

/// What happens to the store's current flow when a new one is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Evict the previous current flow and make the new one current.
    #[default]
    CleanupPrevious,
    /// Leave existing flows in place.
    KeepPrevious,
}

/// Record of a flow whose target screen has been launched.
#[derive(Debug, Clone, PartialEq)]
pub struct StartedFlow {
    pub flow_id: FlowId,
    pub target: String,
    pub params: ParamSet,
}

type FlowCell = Arc<watch::Sender<Option<BundleData>>>;

#[derive(Default)]
struct Inner {
    flows: HashMap<FlowId, FlowCell>,
    current: Option<FlowId>,
    started: HashMap<FlowId, StartedFlow>,
}

impl Inner {
    fn remove(&mut self, id: &FlowId) -> bool {
        self.started.remove(id);
        if self.current.as_ref() == Some(id) {
            self.current = None;
        }
        self.flows.remove(id).is_some()
    }
}

/// Cloneable handle to a set of value flows.
#[derive(Clone, Default)]
pub struct FlowStore {
    inner: Arc<RwLock<Inner>>,
}

impl fmt::Debug for FlowStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowStore")
            .field("flows", &self.len())
            .finish()
    }
}

impl FlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_flow(&self, policy: CleanupPolicy) -> (FlowId, FlowEmitter) {
        let id = FlowId::generate();
        let (tx, _) = watch::channel(None);
        let cell = Arc::new(tx);

        let mut inner = self.write();
        if policy == CleanupPolicy::CleanupPrevious {
            if let Some(previous) = inner.current.clone() {
                inner.remove(&previous);
                tracing::debug!("[FlowStore] Evicted previous flow {}", previous);
            }
            inner.current = Some(id.clone());
        }
        inner.flows.insert(id.clone(), cell.clone());
        tracing::debug!(
            "[FlowStore] Created flow {} ({} live)",
            id,
            inner.flows.len()
        );

        (id.clone(), FlowEmitter { id, cell })
    }

    /// Subscribe to a flow. The stream starts with the latest emission.
    pub fn get_flow(&self, id: &FlowId) -> Result<ValueStream, FlowIntentError> {
        let inner = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner
            .flows
            .get(id)
            .map(|cell| ValueStream {
                rx: cell.subscribe(),
            })
            .ok_or_else(|| FlowIntentError::Lookup(format!("No flow found for id: {}", id)))
    }

    /// Remove one flow from the store. Later [`get_flow`](Self::get_flow)
    /// lookups fail; emitters and subscribers already holding the flow keep
    /// working until they are dropped.
    pub fn evict(&self, id: &FlowId) -> bool {
        self.write().remove(id)
    }

    pub fn clear(&self) {
        let mut inner = self.write();
        inner.flows.clear();
        inner.started.clear();
        inner.current = None;
        tracing::debug!("[FlowStore] Flows cleared");
    }

    pub fn contains(&self, id: &FlowId) -> bool {
        self.inner
            .read()
            .map(|inner| inner.flows.contains_key(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|inner| inner.flows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mark_started(&self, started: StartedFlow) {
        self.write().started.insert(started.flow_id.clone(), started);
    }

    /// The started flow a launched screen belongs to, found through the
    /// `flowId` extra of the request that launched it.
    pub fn current(&self, request: &LaunchRequest) -> Result<StartedFlow, FlowIntentError> {
        let flow_id = request.extra(FLOW_ID_EXTRA);
        let inner = self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        flow_id
            .and_then(|id| inner.started.get(&FlowId::from(id)))
            .cloned()
            .ok_or_else(|| {
                FlowIntentError::Lookup(format!(
                    "No started flow for flowId: {}",
                    flow_id.unwrap_or("<missing>")
                ))
            })
    }

    /// Values of the flow that launched the screen holding `request`.
    pub fn values_for(&self, request: &LaunchRequest) -> Result<ValueStream, FlowIntentError> {
        let started = self.current(request)?;
        self.get_flow(&started.flow_id)
    }

    /// Flows created through the scope are evicted when it is dropped.
    pub fn open_scope(&self) -> FlowScope {
        FlowScope {
            store: self.clone(),
            owned: Mutex::new(Vec::new()),
        }
    }
}

/// Write side of a flow.
#[derive(Clone)]
pub struct FlowEmitter {
    id: FlowId,
    cell: FlowCell,
}

impl fmt::Debug for FlowEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowEmitter").field("id", &self.id).finish()
    }
}

impl FlowEmitter {
    pub fn id(&self) -> &FlowId {
        &self.id
    }

    /// Replace the flow's latest value. Never blocks.
    pub fn emit(&self, key: impl Into<String>, value: impl Into<Value>) {
        let data = BundleData {
            key: key.into(),
            value: value.into(),
        };
        tracing::debug!("[FlowStore] Emitted {} on flow {}", data.key, self.id);
        self.cell.send_replace(Some(data));
    }

    /// Serialize `value` and emit it.
    pub fn emit_serialized<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), FlowIntentError> {
        let value = serde_json::to_value(value)
            .map_err(|e| FlowIntentError::Configuration(format!("Unserializable value: {}", e)))?;
        self.emit(key, value);
        Ok(())
    }
}

/// Read side of a flow.
pub struct ValueStream {
    rx: watch::Receiver<Option<BundleData>>,
}

impl ValueStream {
    pub fn latest(&self) -> Option<BundleData> {
        self.rx.borrow().clone()
    }

    /// Latest emission first, then each later one.
    pub fn into_stream(self) -> impl Stream<Item = BundleData> + Send + Unpin {
        WatchStream::new(self.rx).filter_map(|data| data)
    }

    /// Only emissions under `key`, decoded as `T`. Values that do not decode are skipped.
    pub fn typed<T>(self, key: &str) -> impl Stream<Item = T> + Send + Unpin
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.to_string();
        self.into_stream().filter_map(move |data| {
            if data.key == key {
                serde_json::from_value(data.value).ok()
            } else {
                None
            }
        })
    }
}

/// Owner of the flows created through it.
pub struct FlowScope {
    store: FlowStore,
    owned: Mutex<Vec<FlowId>>,
}

impl FlowScope {
    pub fn store(&self) -> &FlowStore {
        &self.store
    }

    pub fn create_flow(&self, policy: CleanupPolicy) -> (FlowId, FlowEmitter) {
        let (id, emitter) = self.store.create_flow(policy);
        self.owned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(id.clone());
        (id, emitter)
    }
}

impl Drop for FlowScope {
    fn drop(&mut self) {
        let owned = std::mem::take(
            self.owned
                .get_mut()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let mut inner = self.store.write();
        let evicted = owned.iter().filter(|id| inner.remove(id)).count();
        if evicted > 0 {
            tracing::debug!("[FlowStore] Scope closed, evicted {} flow(s)", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_late_subscriber_sees_latest_value() {
        let store = FlowStore::new();
        let (id, emitter) = store.create_flow(CleanupPolicy::CleanupPrevious);
        emitter.emit("progress", 10);
        emitter.emit("progress", 20);

        let mut stream = store.get_flow(&id).unwrap().into_stream();
        let first = stream.next().await.unwrap();
        assert_eq!(first.value, json!(20));

        emitter.emit("status", "done");
        let second = stream.next().await.unwrap();
        assert_eq!(second.key, "status");
    }

    #[tokio::test]
    async fn test_evicted_flow_keeps_existing_subscribers() {
        let store = FlowStore::new();
        let (id, emitter) = store.create_flow(CleanupPolicy::KeepPrevious);
        let mut stream = store.get_flow(&id).unwrap().into_stream();

        assert!(store.evict(&id));
        assert!(store.get_flow(&id).is_err());

        emitter.emit("after", "evict");
        let data = stream.next().await.unwrap();
        assert_eq!(data.key, "after");
    }

    #[tokio::test]
    async fn test_typed_filters_by_key() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            name: String,
        }

        let store = FlowStore::new();
        let (id, emitter) = store.create_flow(CleanupPolicy::KeepPrevious);
        let mut users = store.get_flow(&id).unwrap().typed::<User>("user");

        emitter.emit("other", 1);
        tokio::task::yield_now().await;
        emitter
            .emit_serialized("user", &json!({"name": "ada"}))
            .unwrap();

        let user = users.next().await.unwrap();
        assert_eq!(user, User { name: "ada".to_string() });
    }

    #[test]
    fn test_cleanup_previous_evicts_current() {
        let store = FlowStore::new();
        let (first, _) = store.create_flow(CleanupPolicy::CleanupPrevious);
        let (kept, _) = store.create_flow(CleanupPolicy::KeepPrevious);
        let (second, _) = store.create_flow(CleanupPolicy::CleanupPrevious);

        assert!(matches!(store.get_flow(&first), Err(FlowIntentError::Lookup(_))));
        assert!(store.contains(&kept));
        assert!(store.contains(&second));

        let (_, _) = store.create_flow(CleanupPolicy::CleanupPrevious);
        assert!(!store.contains(&second));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_scope_evicts_on_drop() {
        let store = FlowStore::new();
        let (outside, _) = store.create_flow(CleanupPolicy::KeepPrevious);
        let inside = {
            let scope = store.open_scope();
            let (id, _) = scope.create_flow(CleanupPolicy::KeepPrevious);
            assert!(scope.store().contains(&id));
            id
        };
        assert!(!store.contains(&inside));
        assert!(store.contains(&outside));
    }

    #[test]
    fn test_current_requires_started_flow() {
        let store = FlowStore::new();
        let (id, _) = store.create_flow(CleanupPolicy::KeepPrevious);
        let request = LaunchRequest::new("app.Detail").with_extra(FLOW_ID_EXTRA, &id);

        let err = store.current(&request).unwrap_err();
        assert!(err.to_string().contains(id.as_str()));
        assert!(store
            .current(&LaunchRequest::new("app.Detail"))
            .unwrap_err()
            .to_string()
            .contains("<missing>"));

        store.mark_started(StartedFlow {
            flow_id: id.clone(),
            target: "app.Detail".to_string(),
            params: ParamSet::new(),
        });
        assert_eq!(store.current(&request).unwrap().flow_id, id);
        assert!(store.values_for(&request).is_ok());

        store.clear();
        assert!(store.is_empty());
        assert!(store.current(&request).is_err());
    }
}
