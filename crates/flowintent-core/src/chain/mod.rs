//! Step chains: ordered request/response steps driven by platform results.
//!
//! Chains are assembled one of three ways, all producing a [`ChainEngine`]:
//!
//! - [`ChainBuilder`]: sequential DSL, steps run in insertion order
//! - [`StepRegistry`]: explicit table of named steps linked through `next`
//! - [`ChainDefinition`]: a YAML file loaded into a registry

pub mod builder;
pub mod definition;
pub mod engine;
pub mod launcher;
pub mod registry;
pub mod step;

pub use builder::{flow_intent_chain, ChainBuilder};
pub use definition::{resolve_template, ChainDefinition, ParamRuleDef, RuleKind, StepDef};
pub use engine::{
    ChainEngine, ChainEvent, ChainRun, ChainState, ResultStream, RunSummary, ValidationErrorHandler,
};
pub use launcher::{CorrelationToken, Dispatch, Launcher, ResultSink};
pub use registry::{StepDecl, StepRegistry};
pub use step::{RequestBuilder, ResultHandler, Step, StepId};
