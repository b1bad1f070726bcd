//! Validator: named, predicate-based rules checked against a [`ParamSet`].
//!
//! Every rule runs on every validation; failures are collected rather than
//! short-circuited so a deep-link caller learns everything that is wrong in one
//! pass and can choose a fallback destination up front.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::params::{parse_structured, ParamSet};
use crate::error::FlowIntentError;

/// Predicate over the string-typed read of a param.
pub type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9+_.-]+@(.+)$";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern is valid"))
}

/// A single parameter rule.
#[derive(Clone)]
pub struct ParamRule {
    pub name: String,
    pub required: bool,
    predicate: Option<Predicate>,
    pub error_message: String,
}

impl fmt::Debug for ParamRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamRule")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("has_predicate", &self.predicate.is_some())
            .field("error_message", &self.error_message)
            .finish()
    }
}

impl ParamRule {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let error_message = format!("Invalid value for {}", name);
        Self {
            name,
            required: false,
            predicate: None,
            error_message,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn required_if(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn check<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    fn message_or(mut self, message: Option<&str>) -> Self {
        if let Some(m) = message {
            self.error_message = m.to_string();
        }
        self
    }

    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    fn evaluate(&self, params: &ParamSet) -> Option<RuleFailure> {
        if self.required && !params.contains_key(&self.name) {
            return Some(RuleFailure {
                param: self.name.clone(),
                kind: FailureKind::Missing,
                message: format!("{} is required", self.name),
            });
        }

        let value = params.get::<String>(&self.name)?;
        let predicate = self.predicate.as_ref()?;
        if predicate(&value) {
            None
        } else {
            Some(RuleFailure {
                param: self.name.clone(),
                kind: FailureKind::Rejected,
                message: self.error_message.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Missing,
    Rejected,
}

/// One failed rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub param: String,
    pub kind: FailureKind,
    pub message: String,
}

/// Aggregate of every rule that failed during one validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    failures: Vec<RuleFailure>,
}

impl ValidationError {
    pub fn failures(&self) -> &[RuleFailure] {
        &self.failures
    }

    /// All failure messages joined with `"; "`.
    pub fn message(&self) -> String {
        self.failures
            .iter()
            .map(|f| f.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for ValidationError {}

/// An ordered set of parameter rules.
#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: Vec<ParamRule>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Rules for the same name accumulate.
    pub fn param(&mut self, rule: ParamRule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Register a rule from its parts.
    pub fn rule<F>(&mut self, name: &str, required: bool, predicate: F, message: Option<&str>) -> &mut Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let rule = ParamRule::new(name)
            .required_if(required)
            .check(predicate)
            .message_or(message);
        self.param(rule)
    }

    /// The value must fully match `pattern`.
    pub fn pattern(
        &mut self,
        name: &str,
        pattern: &str,
        required: bool,
        message: Option<&str>,
    ) -> Result<&mut Self, FlowIntentError> {
        let re = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            FlowIntentError::configuration(format!(
                "Invalid pattern for param '{}': {}",
                name, e
            ))
        })?;
        let rule = ParamRule::new(name)
            .required_if(required)
            .message(format!("Value for {} must match pattern {}", name, pattern))
            .message_or(message)
            .check(move |v| re.is_match(v));
        Ok(self.param(rule))
    }

    /// The value must parse as an integer within `min..=max`.
    pub fn range(
        &mut self,
        name: &str,
        min: i64,
        max: i64,
        required: bool,
        message: Option<&str>,
    ) -> &mut Self {
        let rule = ParamRule::new(name)
            .required_if(required)
            .message(format!("Value for {} must be between {} and {}", name, min, max))
            .message_or(message)
            .check(move |v| v.parse::<i64>().map(|n| (min..=max).contains(&n)).unwrap_or(false));
        self.param(rule)
    }

    pub fn email(&mut self, name: &str, required: bool, message: Option<&str>) -> &mut Self {
        let rule = ParamRule::new(name)
            .required_if(required)
            .message(format!("Value for {} must be a valid email", name))
            .message_or(message)
            .check(|v| email_regex().is_match(v));
        self.param(rule)
    }

    /// Parse the value as a JSON object or array, then apply `predicate`.
    /// Unparseable values and bare scalars fail.
    pub fn json<F>(
        &mut self,
        name: &str,
        required: bool,
        message: Option<&str>,
        predicate: F,
    ) -> &mut Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let rule = ParamRule::new(name)
            .required_if(required)
            .message(format!("Invalid JSON for {}", name))
            .message_or(message)
            .check(move |v| {
                parse_structured(v)
                    .map(|parsed| predicate(&parsed))
                    .unwrap_or(false)
            });
        self.param(rule)
    }

    /// The value must equal one of `values`.
    pub fn one_of<I, S>(
        &mut self,
        name: &str,
        values: I,
        required: bool,
        message: Option<&str>,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: Vec<String> = values.into_iter().map(Into::into).collect();
        let rule = ParamRule::new(name)
            .required_if(required)
            .message(format!(
                "Value for {} must be one of: {}",
                name,
                allowed.join(", ")
            ))
            .message_or(message)
            .check(move |v| allowed.iter().any(|a| a == v));
        self.param(rule)
    }

    /// Append every rule of `other`, keeping registration order.
    pub fn extend(&mut self, other: Validator) {
        self.rules.extend(other.rules);
    }

    pub fn rules(&self) -> &[ParamRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule in registration order and aggregate the failures.
    pub fn validate<'a>(&self, params: &'a ParamSet) -> Result<&'a ParamSet, ValidationError> {
        let failures: Vec<RuleFailure> = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(params))
            .collect();

        if failures.is_empty() {
            Ok(params)
        } else {
            tracing::debug!(
                "[Validator] {} of {} rule(s) failed",
                failures.len(),
                self.rules.len()
            );
            Err(ValidationError { failures })
        }
    }
}
