//! Value channel: keyed latest-value flows linking a launching screen to the
//! screen it launched.

pub mod intent;
pub mod store;

pub use intent::{FlowIntent, StartOutcome};
pub use store::{
    BundleData, CleanupPolicy, FlowEmitter, FlowId, FlowScope, FlowStore, StartedFlow, ValueStream,
};
