//! FlowIntent Core: platform-agnostic screen-flow orchestration.
//!
//! This crate contains the building blocks for driving multi-screen flows
//! through an injected platform [`Launcher`](chain::Launcher):
//!
//! - `deeplink`: typed deep-link parameters and predicate-based validation
//! - `chain`: request/response step chains (sequential DSL, registry, YAML)
//! - `channel`: keyed latest-value flows between a launcher and its target
//!
//! It has no platform dependency, making it suitable for use behind a mobile
//! bridge, a desktop shell, or the scripted platform in `flowintent-cli`.

pub mod chain;
pub mod channel;
pub mod config;
pub mod deeplink;
pub mod error;
pub mod models;

// Convenience re-exports
pub use chain::{
    flow_intent_chain, ChainBuilder, ChainDefinition, ChainEngine, ChainEvent, ChainRun,
    ChainState, Dispatch, Launcher, ResultSink, StepDecl, StepRegistry,
};
pub use channel::{CleanupPolicy, FlowIntent, FlowStore};
pub use config::{ChainConfig, JobRetention, ValidationPolicy};
pub use deeplink::{ParamRule, ParamSet, ValidationError, Validator};
pub use error::FlowIntentError;
