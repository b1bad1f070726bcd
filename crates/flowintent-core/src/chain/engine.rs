//! ChainEngine: drives a sequence of request/response steps to completion.
//!
//! Results enter through a single unbounded queue and are processed by one
//! spawned task, so handlers observe results in a total order:
//!
//! ```text
//! platform ──ResultSink::deliver──► mpsc ──► run loop ──► handler
//!                                               │            │
//!                                               │            ▼
//!                                               │      next step? ──► Launcher::launch_for_result
//!                                               ▼
//!                                         broadcast ChainEvent ──► subscribers
//! ```

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::Stream;

use super::launcher::{CorrelationToken, Delivery, Dispatch, Launcher, ResultSink};
use super::step::{Step, StepId};
use crate::config::{ChainConfig, ValidationPolicy};
use crate::deeplink::{ParamSet, ValidationError, Validator};
use crate::error::FlowIntentError;
use crate::models::LaunchResult;

/// Receives the aggregated failure when deep-link validation fails at start.
pub type ValidationErrorHandler = Box<dyn Fn(&ValidationError) + Send + Sync>;

/// Stream of processed results, in processing order.
pub type ResultStream = Pin<Box<dyn Stream<Item = ChainEvent> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    Configuring,
    Running,
    Completed,
}

/// A processed result as seen by subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct ChainEvent {
    /// Zero-based position of this result in the run.
    pub sequence: usize,
    pub step: StepId,
    #[serde(serialize_with = "serialize_token")]
    pub token: CorrelationToken,
    pub result: LaunchResult,
    pub received_at: DateTime<Utc>,
}

fn serialize_token<S: serde::Serializer>(
    token: &CorrelationToken,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(token)
}

/// Totals reported when a run ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub dispatched: usize,
    pub results: usize,
    pub completed: bool,
}

enum Progression {
    /// Steps run in insertion order.
    Sequential,
    /// Steps follow their `next` names, starting from `initial` or the first step.
    Named { initial: Option<StepId> },
}

pub struct ChainEngine {
    steps: Vec<Step>,
    progression: Progression,
    params: Option<ParamSet>,
    validator: Option<Validator>,
    on_validation_error: Option<ValidationErrorHandler>,
    launcher: Arc<dyn Launcher>,
    config: ChainConfig,
    events: broadcast::Sender<ChainEvent>,
}

impl ChainEngine {
    /// An engine whose steps run in insertion order.
    pub fn sequential(steps: Vec<Step>, launcher: Arc<dyn Launcher>, config: ChainConfig) -> Self {
        Self::with_progression(steps, Progression::Sequential, launcher, config)
    }

    /// An engine whose steps are looked up by name and linked through `next`.
    pub fn declarative(
        steps: Vec<Step>,
        initial: Option<StepId>,
        launcher: Arc<dyn Launcher>,
        config: ChainConfig,
    ) -> Self {
        Self::with_progression(steps, Progression::Named { initial }, launcher, config)
    }

    fn with_progression(
        steps: Vec<Step>,
        progression: Progression,
        launcher: Arc<dyn Launcher>,
        config: ChainConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            steps,
            progression,
            params: None,
            validator: None,
            on_validation_error: None,
            launcher,
            config,
            events,
        }
    }

    pub fn with_params(mut self, params: ParamSet) -> Self {
        self.params = Some(params);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn on_validation_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ValidationError) + Send + Sync + 'static,
    {
        self.on_validation_error = Some(Box::new(handler));
        self
    }

    pub(crate) fn set_validation_error_handler(&mut self, handler: Option<ValidationErrorHandler>) {
        self.on_validation_error = handler;
    }

    pub fn state(&self) -> ChainState {
        ChainState::Configuring
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Subscribe before starting to observe every result of the run.
    pub fn subscribe(&self) -> ResultStream {
        event_stream(self.events.subscribe())
    }

    /// Validate the configuration, run deep-link validation, dispatch the
    /// first request and spawn the result loop. Must be called within a tokio
    /// runtime.
    pub fn start(self) -> Result<ChainRun, FlowIntentError> {
        if self.steps.is_empty() {
            return Err(FlowIntentError::configuration("No steps defined"));
        }

        let (index, first) = self.resolve_layout()?;

        let blocked = match (&self.params, &self.validator) {
            (Some(params), Some(validator)) => match validator.validate(params) {
                Ok(_) => false,
                Err(err) => {
                    tracing::warn!("[ChainEngine] Deep link validation failed: {}", err);
                    if let Some(handler) = &self.on_validation_error {
                        handler(&err);
                    }
                    self.config.validation_policy == ValidationPolicy::BlockFirstLaunch
                }
            },
            _ => false,
        };

        let open = Arc::new(AtomicBool::new(!blocked));
        let dispatched = Arc::new(AtomicUsize::new(0));
        let events = self.events.subscribe();

        if blocked {
            tracing::info!("[ChainEngine] First launch blocked by validation policy");
            let (_, state) = watch::channel(ChainState::Completed);
            return Ok(ChainRun {
                state,
                events,
                dispatched,
                open,
                task: None,
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ChainState::Running);
        let mut core = RunCore {
            steps: self.steps,
            index,
            sequential: matches!(self.progression, Progression::Sequential),
            params: self.params,
            launcher: self.launcher,
            events: self.events,
            tx,
            open: open.clone(),
            dispatched: dispatched.clone(),
            state: state_tx,
            pending: None,
            sequence: 0,
        };

        tracing::info!(
            "[ChainEngine] Starting chain with {} step(s)",
            core.steps.len()
        );
        core.dispatch(first, None);
        let task = tokio::spawn(core.run(rx));

        Ok(ChainRun {
            state,
            events,
            dispatched,
            open,
            task: Some(task),
        })
    }

    /// Name index plus the position of the first step to dispatch.
    fn resolve_layout(&self) -> Result<(HashMap<StepId, usize>, usize), FlowIntentError> {
        let mut index = HashMap::with_capacity(self.steps.len());
        for (i, step) in self.steps.iter().enumerate() {
            if index.insert(step.id().clone(), i).is_some() {
                return Err(FlowIntentError::configuration(format!(
                    "Duplicate step name '{}'",
                    step.id()
                )));
            }
        }

        match &self.progression {
            Progression::Sequential => Ok((index, 0)),
            Progression::Named { initial } => {
                for step in &self.steps {
                    if let Some(next) = step.next() {
                        if !index.contains_key(next) {
                            return Err(FlowIntentError::configuration(format!(
                                "Step '{}' references unknown next step '{}'",
                                step.id(),
                                next
                            )));
                        }
                    }
                }
                let first = match initial {
                    Some(id) => *index.get(id).ok_or_else(|| {
                        FlowIntentError::configuration(format!("Initial step '{}' not found", id))
                    })?,
                    None => 0,
                };
                Ok((index, first))
            }
        }
    }
}

struct Pending {
    token: CorrelationToken,
    index: usize,
}

/// State owned by the run loop.
struct RunCore {
    steps: Vec<Step>,
    index: HashMap<StepId, usize>,
    sequential: bool,
    params: Option<ParamSet>,
    launcher: Arc<dyn Launcher>,
    events: broadcast::Sender<ChainEvent>,
    tx: mpsc::UnboundedSender<Delivery>,
    open: Arc<AtomicBool>,
    dispatched: Arc<AtomicUsize>,
    state: watch::Sender<ChainState>,
    pending: Option<Pending>,
    sequence: usize,
}

impl RunCore {
    fn dispatch(&mut self, index: usize, previous: Option<&LaunchResult>) {
        let step = &self.steps[index];
        let request = step.build_request(previous, self.params.as_ref());
        let token = CorrelationToken::generate();

        self.pending = Some(Pending { token, index });
        self.dispatched.fetch_add(1, Ordering::SeqCst);

        tracing::info!(
            "[ChainEngine] Dispatching step '{}' -> {} (token {})",
            step.id(),
            request.target,
            token
        );
        self.launcher.launch_for_result(Dispatch {
            token,
            step: step.id().clone(),
            request,
            mode: step.launch_mode(),
            reply: ResultSink::new(token, self.tx.clone(), self.open.clone()),
        });
    }

    fn next_after(&self, index: usize) -> Option<usize> {
        if self.sequential {
            Some(index + 1).filter(|i| *i < self.steps.len())
        } else {
            self.steps[index]
                .next()
                .and_then(|name| self.index.get(name).copied())
        }
    }

    fn torn_down(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Delivery>) -> Result<RunSummary, FlowIntentError> {
        while let Some(delivery) = rx.recv().await {
            if self.torn_down() {
                break;
            }
            let pending = match self.pending.take() {
                Some(p) if p.token == delivery.token => p,
                other => {
                    tracing::warn!(
                        "[ChainEngine] Ignoring result for stale token {}",
                        delivery.token
                    );
                    self.pending = other;
                    continue;
                }
            };

            let step_id = self.steps[pending.index].id().clone();
            tracing::debug!(
                "[ChainEngine] Result for step '{}' (status {})",
                step_id,
                delivery.result.status
            );
            self.steps[pending.index].handle(&delivery.result);
            // Teardown may land while a handler runs; abort only fires at the next await.
            if self.torn_down() {
                tracing::debug!(
                    "[ChainEngine] Run torn down during handler for step '{}'",
                    step_id
                );
                break;
            }

            let finished = match self.next_after(pending.index) {
                Some(next) => {
                    self.dispatch(next, Some(&delivery.result));
                    false
                }
                None => {
                    self.open.store(false, Ordering::SeqCst);
                    self.state.send_replace(ChainState::Completed);
                    true
                }
            };

            let event = ChainEvent {
                sequence: self.sequence,
                step: step_id,
                token: delivery.token,
                result: delivery.result,
                received_at: Utc::now(),
            };
            self.sequence += 1;
            // No subscribers is fine.
            let _ = self.events.send(event);

            if finished {
                tracing::info!(
                    "[ChainEngine] Chain completed after {} result(s)",
                    self.sequence
                );
                break;
            }
        }

        Ok(RunSummary {
            dispatched: self.dispatched.load(Ordering::SeqCst),
            results: self.sequence,
            completed: *self.state.borrow() == ChainState::Completed,
        })
    }
}

/// Handle to a started chain. Dropping it tears the run down.
pub struct ChainRun {
    state: watch::Receiver<ChainState>,
    /// Kept only to resubscribe; never read.
    events: broadcast::Receiver<ChainEvent>,
    dispatched: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
    task: Option<JoinHandle<Result<RunSummary, FlowIntentError>>>,
}

impl ChainRun {
    pub fn state(&self) -> ChainState {
        *self.state.borrow()
    }

    pub fn is_completed(&self) -> bool {
        self.state() == ChainState::Completed
    }

    /// Number of requests handed to the launcher so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Results processed after this call. The stream ends when the run completes.
    pub fn subscribe(&self) -> ResultStream {
        event_stream(self.events.resubscribe())
    }

    /// Wait until the run reaches [`ChainState::Completed`]. Returns early if
    /// the run is torn down first.
    pub async fn completed(&mut self) {
        let _ = self
            .state
            .wait_for(|state| *state == ChainState::Completed)
            .await;
    }

    /// Wait for the run loop to end. A panic raised by a result handler is
    /// resumed here.
    pub async fn join(mut self) -> Result<RunSummary, FlowIntentError> {
        let Some(task) = self.task.take() else {
            return Ok(self.summary());
        };
        match task.await {
            Ok(summary) => summary,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Ok(self.summary()),
        }
    }

    /// Stop the run. Results delivered afterwards are refused.
    pub fn teardown(mut self) {
        self.shutdown();
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            dispatched: self.dispatched(),
            results: 0,
            completed: self.is_completed(),
        }
    }

    fn shutdown(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                tracing::info!("[ChainEngine] Tearing down running chain");
            }
            task.abort();
        }
    }
}

impl Drop for ChainRun {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn event_stream(mut rx: broadcast::Receiver<ChainEvent>) -> ResultStream {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => yield event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("[ChainEngine] Subscriber lagged, skipped {} event(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use tokio_stream::StreamExt;

    use super::*;
    use crate::deeplink::ParamRule;
    use crate::models::{LaunchMode, LaunchRequest};

    /// Forwards every dispatch to the test through a channel.
    pub(crate) struct ChannelLauncher {
        tx: mpsc::UnboundedSender<Dispatch>,
    }

    impl ChannelLauncher {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Dispatch>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(Self { tx }), rx)
        }
    }

    impl Launcher for ChannelLauncher {
        fn launch(&self, _request: LaunchRequest, _mode: LaunchMode) {}

        fn launch_for_result(&self, dispatch: Dispatch) {
            let _ = self.tx.send(dispatch);
        }
    }

    fn picked(uri: &str) -> LaunchResult {
        LaunchResult::ok(LaunchRequest::default().with_data(uri))
    }

    fn two_steps(log: Arc<Mutex<Vec<String>>>) -> Vec<Step> {
        let first_log = log.clone();
        vec![
            Step::new("step-0", |_, _| LaunchRequest::new("app.Picker"))
                .with_handler(move |r| first_log.lock().unwrap().push(format!("first:{}", r.status))),
            Step::new("step-1", |prev, _| {
                LaunchRequest::new("app.Viewer").with_data(prev.and_then(|r| r.data()).unwrap_or_default())
            })
            .with_handler(move |r| log.lock().unwrap().push(format!("second:{}", r.status))),
        ]
    }

    #[tokio::test]
    async fn test_sequential_chain_runs_to_completion() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = ChainEngine::sequential(two_steps(log.clone()), launcher, ChainConfig::default());
        assert_eq!(engine.state(), ChainState::Configuring);

        let run = engine.start().unwrap();
        assert_eq!(run.state(), ChainState::Running);

        let first = dispatches.recv().await.unwrap();
        assert_eq!(first.step.as_str(), "step-0");
        assert_eq!(first.request.target, "app.Picker");
        assert!(first.reply.deliver(picked("content://images/7")));

        let second = dispatches.recv().await.unwrap();
        assert_eq!(second.request.data.as_deref(), Some("content://images/7"));
        assert!(second.reply.deliver(LaunchResult::canceled()));

        let summary = run.join().await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                dispatched: 2,
                results: 2,
                completed: true
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["first:-1", "second:0"]);
    }

    #[tokio::test]
    async fn test_event_published_after_follow_up_dispatch() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let engine = ChainEngine::sequential(
            two_steps(Arc::new(Mutex::new(Vec::new()))),
            launcher,
            ChainConfig::default(),
        );
        let mut events = engine.subscribe();
        let run = engine.start().unwrap();

        dispatches.recv().await.unwrap().reply.deliver(picked("a"));
        let event = events.next().await.unwrap();
        assert_eq!(event.sequence, 0);
        assert_eq!(event.step.as_str(), "step-0");
        assert_eq!(run.dispatched(), 2);

        dispatches.recv().await.unwrap().reply.deliver(picked("b"));
        let last = events.next().await.unwrap();
        assert_eq!(last.sequence, 1);
        assert_eq!(run.state(), ChainState::Completed);
        drop(run);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stale_token_is_ignored() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = ChainEngine::sequential(two_steps(log.clone()), launcher, ChainConfig::default());
        let mut events = engine.subscribe();
        let run = engine.start().unwrap();

        let first = dispatches.recv().await.unwrap();
        let forged = first.reply.forge(CorrelationToken::generate());
        assert!(forged.deliver(picked("stale")));
        first.reply.deliver(picked("fresh"));

        let event = events.next().await.unwrap();
        assert_eq!(event.result.data(), Some("fresh"));
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(run.dispatched(), 2);
    }

    #[tokio::test]
    async fn test_teardown_refuses_later_results() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let engine = ChainEngine::sequential(two_steps(log.clone()), launcher, ChainConfig::default());
        let run = engine.start().unwrap();

        let first = dispatches.recv().await.unwrap();
        run.teardown();
        assert!(!first.reply.is_open());
        assert!(!first.reply.deliver(picked("late")));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_teardown_during_handler_stops_dispatching() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let (entered_tx, mut entered) = mpsc::unbounded_channel();
        let steps = vec![
            Step::new("a", |_, _| LaunchRequest::new("A")).with_handler(move |_| {
                let _ = entered_tx.send(());
                std::thread::sleep(std::time::Duration::from_millis(200));
            }),
            Step::new("b", |_, _| LaunchRequest::new("B")),
        ];
        let run = ChainEngine::sequential(steps, launcher, ChainConfig::default())
            .start()
            .unwrap();

        dispatches.recv().await.unwrap().reply.deliver(picked("a"));
        entered.recv().await.unwrap();
        run.teardown();

        // The loop owns the last launcher handle, so the channel closes once it exits.
        let next = tokio::time::timeout(std::time::Duration::from_secs(2), dispatches.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_validation_failure_launches_anyway_by_default() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let reported = Arc::new(Mutex::new(None));
        let sink = reported.clone();
        let mut validator = Validator::new();
        validator.param(ParamRule::new("id").required());

        let run = ChainEngine::sequential(
            two_steps(Arc::new(Mutex::new(Vec::new()))),
            launcher,
            ChainConfig::default(),
        )
        .with_params(ParamSet::new())
        .with_validator(validator)
        .on_validation_error(move |err| *sink.lock().unwrap() = Some(err.message()))
        .start()
        .unwrap();

        assert_eq!(reported.lock().unwrap().as_deref(), Some("id is required"));
        assert_eq!(run.dispatched(), 1);
        assert!(dispatches.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_block_first_launch_dispatches_nothing() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let mut validator = Validator::new();
        validator.param(ParamRule::new("id").required());
        let config = ChainConfig {
            validation_policy: ValidationPolicy::BlockFirstLaunch,
            ..ChainConfig::default()
        };

        let run = ChainEngine::sequential(two_steps(Arc::new(Mutex::new(Vec::new()))), launcher, config)
            .with_params(ParamSet::new())
            .with_validator(validator)
            .start()
            .unwrap();

        assert_eq!(run.dispatched(), 0);
        assert_eq!(run.state(), ChainState::Completed);
        let summary = run.join().await.unwrap();
        assert!(summary.completed);
        assert!(dispatches.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_configuration_errors_at_start() {
        let (launcher, _rx) = ChannelLauncher::new();
        let err = ChainEngine::sequential(Vec::new(), launcher.clone(), ChainConfig::default())
            .start()
            .err()
            .unwrap();
        assert!(err.is_configuration());

        let steps = vec![Step::new("a", |_, _| LaunchRequest::new("A")).with_next("missing")];
        let err = ChainEngine::declarative(steps, None, launcher.clone(), ChainConfig::default())
            .start()
            .err()
            .unwrap();
        assert!(err.to_string().contains("missing"));

        let steps = vec![Step::new("a", |_, _| LaunchRequest::new("A"))];
        let err = ChainEngine::declarative(steps, Some(StepId::from("b")), launcher, ChainConfig::default())
            .start()
            .err()
            .unwrap();
        assert!(err.to_string().contains("Initial step 'b' not found"));
    }

    #[tokio::test]
    async fn test_declarative_follows_next_from_initial() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let steps = vec![
            Step::new("view", |_, _| LaunchRequest::new("app.Viewer")),
            Step::new("pick", |_, _| LaunchRequest::new("app.Picker"))
                .with_parent("app.Main")
                .with_next("view"),
        ];
        let run = ChainEngine::declarative(steps, Some(StepId::from("pick")), launcher, ChainConfig::default())
            .start()
            .unwrap();

        let first = dispatches.recv().await.unwrap();
        assert_eq!(first.step.as_str(), "pick");
        assert_eq!(
            first.mode,
            LaunchMode::ParentStack {
                parent: "app.Main".to_string()
            }
        );
        first.reply.deliver(picked("x"));

        let second = dispatches.recv().await.unwrap();
        assert_eq!(second.step.as_str(), "view");
        assert_eq!(second.mode, LaunchMode::Direct);
        second.reply.deliver(picked("y"));

        let summary = run.join().await.unwrap();
        assert_eq!(summary.results, 2);
    }

    #[tokio::test]
    #[should_panic(expected = "handler exploded")]
    async fn test_handler_panic_propagates_through_join() {
        let (launcher, mut dispatches) = ChannelLauncher::new();
        let steps = vec![Step::new("a", |_, _| LaunchRequest::new("A"))
            .with_handler(|_| panic!("handler exploded"))];
        let run = ChainEngine::sequential(steps, launcher, ChainConfig::default())
            .start()
            .unwrap();
        dispatches.recv().await.unwrap().reply.deliver(LaunchResult::canceled());
        let _ = run.join().await;
    }
}
