//! Sequential chain DSL.
//!
//! ```ignore
//! let run = flow_intent_chain(launcher, ChainConfig::default(), |chain| {
//!     chain
//!         .with_deep_link(params, |v| { v.param(ParamRule::new("id").required()); })
//!         .on_deep_link_error(|err| tracing::warn!("{}", err))
//!         .start_activity(|_, _| LaunchRequest::for_action(ACTION_PICK))
//!         .on_result(|result| { /* ... */ })?
//!         .start_activity(|prev, _| LaunchRequest::for_action(ACTION_VIEW));
//!     Ok(())
//! })?;
//! ```

use std::sync::Arc;

use super::engine::{ChainEngine, ChainRun, ValidationErrorHandler};
use super::launcher::Launcher;
use super::step::{Step, StepId};
use crate::config::ChainConfig;
use crate::deeplink::{ParamSet, ValidationError, Validator};
use crate::error::FlowIntentError;
use crate::models::{LaunchRequest, LaunchResult};

/// Collects steps in insertion order for a sequential [`ChainEngine`].
#[derive(Default)]
pub struct ChainBuilder {
    steps: Vec<Step>,
    params: Option<ParamSet>,
    validator: Option<Validator>,
    on_error: Option<ValidationErrorHandler>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach deep-link params and configure the rules they are checked against.
    pub fn with_deep_link<F>(&mut self, params: ParamSet, configure: F) -> &mut Self
    where
        F: FnOnce(&mut Validator),
    {
        let mut validator = Validator::new();
        configure(&mut validator);
        self.params = Some(params);
        self.validator = Some(validator);
        self
    }

    /// Attach params without validation.
    pub fn with_params(&mut self, params: ParamSet) -> &mut Self {
        self.params = Some(params);
        self
    }

    pub fn on_deep_link_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ValidationError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn start_activity<F>(&mut self, builder: F) -> &mut Self
    where
        F: Fn(Option<&LaunchResult>, Option<&ParamSet>) -> LaunchRequest + Send + Sync + 'static,
    {
        let id = StepId::new(format!("step-{}", self.steps.len()));
        self.steps.push(Step::new(id, builder));
        self
    }

    /// Like [`start_activity`](Self::start_activity), launched inside a back
    /// stack that ends at `parent`.
    pub fn start_activity_with_parent<F>(&mut self, parent: impl Into<String>, builder: F) -> &mut Self
    where
        F: Fn(Option<&LaunchResult>, Option<&ParamSet>) -> LaunchRequest + Send + Sync + 'static,
    {
        let id = StepId::new(format!("step-{}", self.steps.len()));
        self.steps.push(Step::new(id, builder).with_parent(parent));
        self
    }

    /// Attach a result handler to the most recently added step.
    pub fn on_result<F>(&mut self, handler: F) -> Result<&mut Self, FlowIntentError>
    where
        F: Fn(&LaunchResult) + Send + Sync + 'static,
    {
        let step = self.steps.last_mut().ok_or_else(|| {
            FlowIntentError::configuration("on_result must follow start_activity")
        })?;
        if step.has_handler() {
            return Err(FlowIntentError::configuration(format!(
                "Step '{}' already has a result handler",
                step.id()
            )));
        }
        step.set_handler(Box::new(handler));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn into_engine(self, launcher: Arc<dyn Launcher>, config: ChainConfig) -> ChainEngine {
        let mut engine = ChainEngine::sequential(self.steps, launcher, config);
        if let Some(params) = self.params {
            engine = engine.with_params(params);
        }
        if let Some(validator) = self.validator {
            engine = engine.with_validator(validator);
        }
        engine.set_validation_error_handler(self.on_error);
        engine
    }

    pub fn launch(self, launcher: Arc<dyn Launcher>, config: ChainConfig) -> Result<ChainRun, FlowIntentError> {
        self.into_engine(launcher, config).start()
    }
}

/// Build a sequential chain with `configure` and start it immediately.
pub fn flow_intent_chain<F>(
    launcher: Arc<dyn Launcher>,
    config: ChainConfig,
    configure: F,
) -> Result<ChainRun, FlowIntentError>
where
    F: FnOnce(&mut ChainBuilder) -> Result<(), FlowIntentError>,
{
    let mut builder = ChainBuilder::new();
    configure(&mut builder)?;
    builder.launch(launcher, config)
}
