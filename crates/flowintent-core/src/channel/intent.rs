//! FlowIntent: a launch request paired with a value flow.
//!
//! The launching side configures static extras, schedules emission jobs and
//! starts the target. The launched side finds the flow again through the
//! `flowId` extra (see [`FlowStore::current`]).

use std::fmt;
use std::future::Future;

use serde_json::Value;
use tokio::task::JoinHandle;

use super::store::{CleanupPolicy, FlowEmitter, FlowId, FlowScope, FlowStore, StartedFlow};
use crate::chain::Launcher;
use crate::config::JobRetention;
use crate::deeplink::{ParamSet, ValidationError, Validator};
use crate::error::FlowIntentError;
use crate::models::{LaunchFlag, LaunchMode, LaunchRequest, ACTION_VIEW, FLOW_ID_EXTRA};

type DeepLinkErrorHandler = Box<dyn Fn(&ValidationError) + Send + Sync>;

/// How [`FlowIntent::start_with_back_stack`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Launched,
    /// Validation failed and the fallback target was launched instead.
    Fallback,
    /// Validation failed and no fallback was configured.
    Rejected,
}

pub struct FlowIntent {
    request: LaunchRequest,
    store: FlowStore,
    emitter: FlowEmitter,
    policy: CleanupPolicy,
    retention: JobRetention,
    job: Option<JoinHandle<()>>,
    jobs: Vec<JoinHandle<()>>,
    params: ParamSet,
    validator: Option<Validator>,
    on_error: Option<DeepLinkErrorHandler>,
    fallback: Option<String>,
    parent: Option<String>,
}

impl fmt::Debug for FlowIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowIntent")
            .field("flow_id", self.flow_id())
            .field("target", &self.request.target)
            .field("policy", &self.policy)
            .field("active_jobs", &self.active_jobs())
            .finish()
    }
}

impl FlowIntent {
    pub fn new(store: &FlowStore, target: impl Into<String>, policy: CleanupPolicy) -> Self {
        let (_, emitter) = store.create_flow(policy);
        Self::with_emitter(store.clone(), emitter, target.into(), policy)
    }

    /// A flow intent that keeps previously created flows alive.
    pub fn from(store: &FlowStore, target: impl Into<String>) -> Self {
        Self::new(store, target, CleanupPolicy::KeepPrevious)
    }

    /// A flow intent whose flow is evicted when `scope` closes.
    pub fn scoped(scope: &FlowScope, target: impl Into<String>, policy: CleanupPolicy) -> Self {
        let (_, emitter) = scope.create_flow(policy);
        Self::with_emitter(scope.store().clone(), emitter, target.into(), policy)
    }

    fn with_emitter(store: FlowStore, emitter: FlowEmitter, target: String, policy: CleanupPolicy) -> Self {
        tracing::debug!("[FlowIntent] Initialized flow {} for {}", emitter.id(), target);
        Self {
            request: LaunchRequest::new(target),
            store,
            emitter,
            policy,
            retention: JobRetention::default(),
            job: None,
            jobs: Vec::new(),
            params: ParamSet::new(),
            validator: None,
            on_error: None,
            fallback: None,
            parent: None,
        }
    }

    pub fn with_retention(mut self, retention: JobRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn flow_id(&self) -> &FlowId {
        self.emitter.id()
    }

    /// The `flowId` extra of a launched screen's request.
    pub fn flow_id_of(request: &LaunchRequest) -> Option<&str> {
        request.extra(FLOW_ID_EXTRA)
    }

    pub fn request(&self) -> &LaunchRequest {
        &self.request
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    /// Static data carried by the launch request.
    pub fn put_extra(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.request.extras.insert(key.into(), value.to_string());
        self
    }

    pub fn emit(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.emitter.emit(key, value);
    }

    pub fn emitter(&self) -> FlowEmitter {
        self.emitter.clone()
    }

    /// Run `action` as an emission job. `CleanupPrevious` cancels the previous
    /// job first; `KeepPrevious` keeps earlier jobs running, up to the
    /// retention bound.
    pub fn schedule_job<F, Fut>(&mut self, action: F) -> Result<(), FlowIntentError>
    where
        F: FnOnce(FlowEmitter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        match self.policy {
            CleanupPolicy::CleanupPrevious => {
                if let Some(previous) = self.job.take() {
                    previous.abort();
                }
                self.job = Some(tokio::spawn(action(self.emitter.clone())));
            }
            CleanupPolicy::KeepPrevious => {
                self.jobs.retain(|job| !job.is_finished());
                let max = self.retention.max_retained_jobs;
                if self.jobs.len() >= max {
                    tracing::warn!(
                        "[FlowIntent] Flow {} already retains {} job(s)",
                        self.flow_id(),
                        self.jobs.len()
                    );
                    return Err(FlowIntentError::JobLimit(max));
                }
                self.jobs.push(tokio::spawn(action(self.emitter.clone())));
            }
        }
        Ok(())
    }

    /// Jobs scheduled and not yet finished.
    pub fn active_jobs(&self) -> usize {
        self.job
            .iter()
            .chain(self.jobs.iter())
            .filter(|job| !job.is_finished())
            .count()
    }

    /// Cancel every scheduled job.
    pub fn stop(&mut self) {
        if let Some(job) = self.job.take() {
            job.abort();
        }
        for job in self.jobs.drain(..) {
            job.abort();
        }
    }

    /// Launch the target with the `flowId` extra and record the flow as started.
    pub fn start(&mut self, launcher: &dyn Launcher) {
        let flow_id = self.flow_id().to_string();
        self.request.extras.insert(FLOW_ID_EXTRA.to_string(), flow_id);
        launcher.launch(self.request.clone(), LaunchMode::Direct);
        self.mark_started();
        tracing::info!("[FlowIntent] Started {} (flow {})", self.request.target, self.flow_id());
    }

    /// Parse `uri` into params, address the request at it and configure the
    /// rules checked by [`start_with_back_stack`](Self::start_with_back_stack).
    pub fn with_deep_link<F>(&mut self, uri: &str, configure: F) -> Result<&mut Self, FlowIntentError>
    where
        F: FnOnce(&mut Validator),
    {
        self.params = ParamSet::from_uri(uri)?;
        self.request.data = Some(uri.to_string());
        self.request.action = Some(ACTION_VIEW.to_string());

        let mut validator = Validator::new();
        configure(&mut validator);
        self.validator = Some(validator);
        Ok(self)
    }

    pub fn on_deep_link_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ValidationError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    /// Target launched when deep-link validation fails.
    pub fn with_fallback(&mut self, target: impl Into<String>) -> &mut Self {
        self.fallback = Some(target.into());
        self
    }

    /// Launch inside a back stack ending at `parent`.
    pub fn with_parent(&mut self, parent: impl Into<String>) -> &mut Self {
        self.parent = Some(parent.into());
        self
    }

    /// Validate the deep link, then launch. `clear_top` applies only without a parent.
    pub fn start_with_back_stack(&mut self, launcher: &dyn Launcher, clear_top: bool) -> StartOutcome {
        if let Some(validator) = &self.validator {
            if let Err(err) = validator.validate(&self.params) {
                if let Some(handler) = &self.on_error {
                    handler(&err);
                }
                return match &self.fallback {
                    Some(fallback) => {
                        let request = LaunchRequest::new(fallback.as_str())
                            .with_extra(FLOW_ID_EXTRA, self.flow_id());
                        tracing::warn!(
                            "[FlowIntent] Deep link rejected, launching fallback {}: {}",
                            fallback,
                            err
                        );
                        launcher.launch(request, LaunchMode::Direct);
                        StartOutcome::Fallback
                    }
                    None => {
                        tracing::error!("[FlowIntent] Deep link error: {}", err);
                        StartOutcome::Rejected
                    }
                };
            }
        }

        let flow_id = self.flow_id().to_string();
        self.request.extras.insert(FLOW_ID_EXTRA.to_string(), flow_id);
        let mode = LaunchMode::from_parent(self.parent.as_deref());
        if mode == LaunchMode::Direct && clear_top {
            self.request.flags.insert(LaunchFlag::ClearTop);
            self.request.flags.insert(LaunchFlag::SingleTop);
        }
        launcher.launch(self.request.clone(), mode);
        self.mark_started();
        tracing::info!(
            "[FlowIntent] Started {} with back stack (flow {})",
            self.request.target,
            self.flow_id()
        );
        StartOutcome::Launched
    }

    fn mark_started(&self) {
        self.store.mark_started(StartedFlow {
            flow_id: self.flow_id().clone(),
            target: self.request.target.clone(),
            params: self.params.clone(),
        });
    }
}

impl Drop for FlowIntent {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::chain::Dispatch;
    use crate::deeplink::ParamRule;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: Mutex<Vec<(LaunchRequest, LaunchMode)>>,
    }

    impl RecordingLauncher {
        fn launched(&self) -> Vec<(LaunchRequest, LaunchMode)> {
            self.launched.lock().unwrap().clone()
        }
    }

    impl Launcher for RecordingLauncher {
        fn launch(&self, request: LaunchRequest, mode: LaunchMode) {
            self.launched.lock().unwrap().push((request, mode));
        }

        fn launch_for_result(&self, _dispatch: Dispatch) {}
    }

    #[tokio::test]
    async fn test_start_links_receiver_to_flow() {
        let store = FlowStore::new();
        let launcher = RecordingLauncher::default();
        let mut intent = FlowIntent::from(&store, "app.Detail");
        intent.put_extra("title", "Hello").put_extra("count", 3);
        intent.start(&launcher);
        intent.emit("progress", 50);

        let (request, mode) = launcher.launched().remove(0);
        assert_eq!(mode, LaunchMode::Direct);
        assert_eq!(request.extra("title"), Some("Hello"));
        assert_eq!(request.extra("count"), Some("3"));
        assert_eq!(FlowIntent::flow_id_of(&request), Some(intent.flow_id().as_str()));

        let started = store.current(&request).unwrap();
        assert_eq!(started.target, "app.Detail");
        let mut values = store.values_for(&request).unwrap().into_stream();
        assert_eq!(values.next().await.unwrap().value, json!(50));
    }

    #[tokio::test]
    async fn test_cleanup_previous_cancels_previous_job() {
        let store = FlowStore::new();
        let mut intent = FlowIntent::new(&store, "app.Detail", CleanupPolicy::CleanupPrevious);
        intent
            .schedule_job(|_| std::future::pending::<()>())
            .unwrap();
        intent
            .schedule_job(|emitter| async move { emitter.emit("status", "second") })
            .unwrap();

        let mut values = store.get_flow(intent.flow_id()).unwrap().into_stream();
        assert_eq!(values.next().await.unwrap().value, json!("second"));
    }

    #[tokio::test]
    async fn test_keep_previous_jobs_are_bounded() {
        let store = FlowStore::new();
        let mut intent = FlowIntent::from(&store, "app.Detail").with_retention(JobRetention {
            max_retained_jobs: 2,
        });
        intent.schedule_job(|_| std::future::pending::<()>()).unwrap();
        intent.schedule_job(|_| std::future::pending::<()>()).unwrap();
        let err = intent
            .schedule_job(|_| std::future::pending::<()>())
            .unwrap_err();
        assert!(matches!(err, FlowIntentError::JobLimit(2)));
        assert_eq!(intent.active_jobs(), 2);

        intent.stop();
        assert_eq!(intent.active_jobs(), 0);
        intent.schedule_job(|_| async {}).unwrap();
    }

    #[tokio::test]
    async fn test_finished_jobs_are_pruned() {
        let store = FlowStore::new();
        let mut intent = FlowIntent::from(&store, "app.Detail").with_retention(JobRetention {
            max_retained_jobs: 1,
        });
        let mut values = store.get_flow(intent.flow_id()).unwrap().into_stream();

        intent
            .schedule_job(|emitter| async move { emitter.emit("n", 1) })
            .unwrap();
        // The job finishes in the same poll that emits, so it is done once the value arrives.
        assert_eq!(values.next().await.unwrap().value, json!(1));

        intent
            .schedule_job(|_| std::future::pending::<()>())
            .unwrap();
        assert_eq!(intent.active_jobs(), 1);
        assert!(matches!(
            intent.schedule_job(|_| async {}),
            Err(FlowIntentError::JobLimit(1))
        ));
    }

    #[tokio::test]
    async fn test_invalid_deep_link_launches_fallback() {
        let store = FlowStore::new();
        let launcher = RecordingLauncher::default();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();

        let mut intent = FlowIntent::from(&store, "app.Detail");
        intent
            .with_deep_link("myapp://detail?action=delete", |v| {
                v.param(ParamRule::new("id").required());
            })
            .unwrap()
            .on_deep_link_error(move |e| sink.lock().unwrap().push(e.message()))
            .with_fallback("app.Home");

        assert_eq!(intent.start_with_back_stack(&launcher, true), StartOutcome::Fallback);
        assert_eq!(*errors.lock().unwrap(), vec!["id is required"]);

        let (request, _) = launcher.launched().remove(0);
        assert_eq!(request.target, "app.Home");
        assert_eq!(FlowIntent::flow_id_of(&request), Some(intent.flow_id().as_str()));
        assert!(store.current(&request).is_err());
    }

    #[tokio::test]
    async fn test_invalid_deep_link_without_fallback_launches_nothing() {
        let store = FlowStore::new();
        let launcher = RecordingLauncher::default();
        let mut intent = FlowIntent::from(&store, "app.Detail");
        intent
            .with_deep_link("myapp://detail", |v| {
                v.param(ParamRule::new("id").required());
            })
            .unwrap();

        assert_eq!(intent.start_with_back_stack(&launcher, false), StartOutcome::Rejected);
        assert!(launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn test_valid_deep_link_with_back_stack() {
        let store = FlowStore::new();
        let launcher = RecordingLauncher::default();
        let mut intent = FlowIntent::from(&store, "app.Detail");
        intent
            .with_deep_link("myapp://detail?id=7", |v| {
                v.range("id", 1, 100, true, None);
            })
            .unwrap()
            .with_parent("app.Main");

        assert_eq!(intent.params().get::<i32>("id"), Some(7));
        assert_eq!(intent.start_with_back_stack(&launcher, true), StartOutcome::Launched);

        let (request, mode) = launcher.launched().remove(0);
        assert_eq!(
            mode,
            LaunchMode::ParentStack {
                parent: "app.Main".to_string()
            }
        );
        assert!(request.flags.is_empty());
        assert_eq!(request.action.as_deref(), Some(ACTION_VIEW));
        assert_eq!(request.data.as_deref(), Some("myapp://detail?id=7"));
        assert_eq!(store.current(&request).unwrap().params.get::<i32>("id"), Some(7));
    }

    #[tokio::test]
    async fn test_clear_top_without_parent() {
        let store = FlowStore::new();
        let launcher = RecordingLauncher::default();
        let mut intent = FlowIntent::new(&store, "app.Detail", CleanupPolicy::CleanupPrevious);
        assert_eq!(intent.start_with_back_stack(&launcher, true), StartOutcome::Launched);

        let (request, _) = launcher.launched().remove(0);
        assert!(request.flags.contains(&LaunchFlag::ClearTop));
        assert!(request.flags.contains(&LaunchFlag::SingleTop));
    }

    #[test]
    fn test_invalid_uri_is_reported() {
        let store = FlowStore::new();
        let mut intent = FlowIntent::from(&store, "app.Detail");
        let err = intent.with_deep_link("::not a uri", |_| {}).unwrap_err();
        assert!(matches!(err, FlowIntentError::InvalidUri(_)));
    }
}
