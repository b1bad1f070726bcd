//! Declarative step registration.
//!
//! Each [`StepDecl`] names its step, the action its request defaults to, the
//! parameter rules it contributes and, optionally, the step that follows it.
//! The registry turns the table into a name-linked [`ChainEngine`].

use std::collections::HashSet;
use std::sync::Arc;

use super::engine::{ChainEngine, ValidationErrorHandler};
use super::launcher::Launcher;
use super::step::{RequestBuilder, ResultHandler, Step, StepId};
use crate::config::ChainConfig;
use crate::deeplink::{ParamRule, ParamSet, ValidationError, Validator};
use crate::error::FlowIntentError;
use crate::models::{LaunchRequest, LaunchResult};

/// One registered step.
pub struct StepDecl {
    name: StepId,
    action: String,
    parent: Option<String>,
    initial: bool,
    params: Vec<ParamRule>,
    builder: RequestBuilder,
    on_result: Option<ResultHandler>,
    next: Option<StepId>,
}

impl StepDecl {
    pub fn new<F>(name: impl Into<StepId>, action: impl Into<String>, builder: F) -> Self
    where
        F: Fn(Option<&LaunchResult>, Option<&ParamSet>) -> LaunchRequest + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            action: action.into(),
            parent: None,
            initial: false,
            params: Vec::new(),
            builder: Box::new(builder),
            on_result: None,
            next: None,
        }
    }

    pub fn parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn initial(mut self) -> Self {
        self.initial = true;
        self
    }

    pub fn param(mut self, rule: ParamRule) -> Self {
        self.params.push(rule);
        self
    }

    pub fn on_result<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LaunchResult) + Send + Sync + 'static,
    {
        self.on_result = Some(Box::new(handler));
        self
    }

    pub fn next(mut self, next: impl Into<StepId>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn name(&self) -> &StepId {
        &self.name
    }
}

/// Explicit table of declared steps.
#[derive(Default)]
pub struct StepRegistry {
    steps: Vec<Step>,
    names: HashSet<StepId>,
    initial: Option<StepId>,
    validator: Validator,
    params: Option<ParamSet>,
    on_error: Option<ValidationErrorHandler>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, decl: StepDecl) -> Result<&mut Self, FlowIntentError> {
        if self.names.contains(&decl.name) {
            return Err(FlowIntentError::configuration(format!(
                "Step '{}' is already registered",
                decl.name
            )));
        }
        if decl.initial {
            if let Some(existing) = &self.initial {
                return Err(FlowIntentError::configuration(format!(
                    "Step '{}' cannot be initial: '{}' already is",
                    decl.name, existing
                )));
            }
            self.initial = Some(decl.name.clone());
        }

        for rule in decl.params {
            self.validator.param(rule);
        }
        tracing::debug!("[StepRegistry] Registered step '{}'", decl.name);

        self.names.insert(decl.name.clone());
        self.steps.push(Step::from_parts(
            decl.name,
            decl.builder,
            decl.on_result,
            decl.next,
            decl.parent,
            Some(decl.action),
        ));
        Ok(self)
    }

    /// A chain-wide rule not tied to any step.
    pub fn rule(&mut self, rule: ParamRule) -> &mut Self {
        self.validator.param(rule);
        self
    }

    /// Append chain-wide rules built elsewhere.
    pub fn extend_rules(&mut self, validator: Validator) -> &mut Self {
        self.validator.extend(validator);
        self
    }

    /// Replaces any previously registered handler.
    pub fn on_deep_link_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&ValidationError) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn with_params(&mut self, params: ParamSet) -> &mut Self {
        self.params = Some(params);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step dispatched first: the one marked initial, else the first registered.
    pub fn initial_step(&self) -> Option<&StepId> {
        self.initial
            .as_ref()
            .or_else(|| self.steps.first().map(|s| s.id()))
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn into_engine(self, launcher: Arc<dyn Launcher>, config: ChainConfig) -> ChainEngine {
        let mut engine = ChainEngine::declarative(self.steps, self.initial, launcher, config)
            .with_validator(self.validator);
        if let Some(params) = self.params {
            engine = engine.with_params(params);
        }
        engine.set_validation_error_handler(self.on_error);
        engine
    }
}
