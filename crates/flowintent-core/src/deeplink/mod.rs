//! Deep-link parameters and their validation.
//!
//! ```text
//! myapp://item?id=7&action=view ──► ParamSet ──► Validator::validate ──► Ok(&ParamSet)
//!                                                        │
//!                                                        └─► Err(ValidationError)  (every failing rule)
//! ```

pub mod params;
pub mod validator;

pub use params::{FromParam, Json, ParamKind, ParamSet, TypedValue};
pub use validator::{FailureKind, ParamRule, Predicate, RuleFailure, ValidationError, Validator};
