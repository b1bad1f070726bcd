//! FlowIntent CLI library: command implementations and the scripted
//! platform used to dry-run chain definitions.

pub mod commands;
pub mod platform;
