//! YAML chain definitions.
//!
//! A definition names its steps, links them through `next`, and declares the
//! deep-link rules checked when the chain starts:
//!
//! ```yaml
//! name: "Pick and view"
//! initial: pick_image
//!
//! config:
//!   validation_policy: block_first_launch
//!
//! params:
//!   - name: id
//!     required: true
//!     rule: { type: pattern, pattern: "[0-9]+" }
//!   - name: action
//!     rule: { type: one_of, values: [view, edit] }
//!     message: "action must be view or edit"
//!
//! steps:
//!   - name: pick_image
//!     action: android.intent.action.PICK
//!     target: com.example.PickerActivity
//!     parent: com.example.MainActivity
//!     extras:
//!       id: "${params.id}"
//!     next: view_image
//!
//!   - name: view_image
//!     action: android.intent.action.VIEW
//!     target: com.example.ViewerActivity
//!     data: "${result.extra.uri}"
//! ```
//!
//! String fields of a step accept `${params.<key>}`, `${result.status}`,
//! `${result.data}` and `${result.extra.<key>}`. Placeholders that cannot be
//! resolved are left in place.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::registry::{StepDecl, StepRegistry};
use crate::config::ChainConfig;
use crate::deeplink::{ParamKind, ParamRule, ParamSet, Validator};
use crate::error::FlowIntentError;
use crate::models::{LaunchFlag, LaunchRequest, LaunchResult};

/// Top-level chain definition loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainDefinition {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// First step to dispatch. Defaults to the first listed step.
    #[serde(default)]
    pub initial: Option<String>,

    #[serde(default)]
    pub config: ChainConfig,

    /// Chain-wide deep-link rules.
    #[serde(default)]
    pub params: Vec<ParamRuleDef>,

    pub steps: Vec<StepDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamRuleDef {
    pub name: String,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub rule: Option<RuleKind>,

    /// Replaces the rule's default failure message.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// The param must be present.
    Present,
    Pattern {
        pattern: String,
    },
    Range {
        min: i64,
        max: i64,
    },
    Email,
    /// The value must be JSON containing every listed top-level key.
    Json {
        #[serde(default)]
        required_keys: Vec<String>,
    },
    OneOf {
        values: Vec<String>,
    },
    /// The value must coerce to the named type (`string`, `int`, `float`, `bool`, `json`).
    Kind {
        kind: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    pub name: String,

    /// Default action of the step's request.
    #[serde(default)]
    pub action: String,

    #[serde(default)]
    pub target: String,

    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default)]
    pub extras: BTreeMap<String, String>,

    #[serde(default)]
    pub data: Option<String>,

    #[serde(default)]
    pub flags: Vec<LaunchFlag>,

    /// Step-level rules; they join the chain-wide ones.
    #[serde(default)]
    pub params: Vec<ParamRuleDef>,

    #[serde(default)]
    pub next: Option<String>,
}

impl ParamRuleDef {
    /// Register this rule on `validator`.
    pub fn apply(&self, validator: &mut Validator) -> Result<(), FlowIntentError> {
        let name = self.name.as_str();
        let message = self.message.as_deref();
        let required = self.required;

        match &self.rule {
            None => {
                validator.param(with_message(ParamRule::new(name).required_if(required), message));
            }
            Some(RuleKind::Present) => {
                validator.param(with_message(ParamRule::new(name).required(), message));
            }
            Some(RuleKind::Pattern { pattern }) => {
                validator.pattern(name, pattern, required, message)?;
            }
            Some(RuleKind::Range { min, max }) => {
                validator.range(name, *min, *max, required, message);
            }
            Some(RuleKind::Email) => {
                validator.email(name, required, message);
            }
            Some(RuleKind::Json { required_keys }) => {
                let keys = required_keys.clone();
                validator.json(name, required, message, move |value| {
                    keys.iter().all(|k| value.get(k).is_some())
                });
            }
            Some(RuleKind::OneOf { values }) => {
                validator.one_of(name, values.iter().cloned(), required, message);
            }
            Some(RuleKind::Kind { kind }) => {
                let parsed = ParamKind::parse(kind)
                    .ok_or_else(|| FlowIntentError::unsupported_type(name, kind))?;
                let rule = ParamRule::new(name)
                    .required_if(required)
                    .message(format!("Value for {} must be of type {}", name, parsed.as_str()))
                    .check(move |v| parsed.coerce(&Value::String(v.to_string())).is_some());
                validator.param(with_message(rule, message));
            }
        }
        Ok(())
    }
}

fn with_message(rule: ParamRule, message: Option<&str>) -> ParamRule {
    match message {
        Some(m) => rule.message(m),
        None => rule,
    }
}

impl ChainDefinition {
    pub fn from_yaml(yaml: &str) -> Result<Self, FlowIntentError> {
        serde_yaml::from_str(yaml)
            .map_err(|e| FlowIntentError::Definition(format!("Failed to parse chain YAML: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowIntentError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowIntentError::Definition(format!(
                "Failed to read chain file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Check step names are unique and that `initial` and every `next` exist.
    pub fn check_links(&self) -> Result<(), FlowIntentError> {
        if self.steps.is_empty() {
            return Err(FlowIntentError::configuration("No steps defined"));
        }
        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return Err(FlowIntentError::configuration(format!(
                    "Step '{}' is already registered",
                    step.name
                )));
            }
        }
        if let Some(initial) = &self.initial {
            if !names.contains(initial.as_str()) {
                return Err(FlowIntentError::configuration(format!(
                    "Initial step '{}' not found",
                    initial
                )));
            }
        }
        for step in &self.steps {
            if let Some(next) = &step.next {
                if !names.contains(next.as_str()) {
                    return Err(FlowIntentError::configuration(format!(
                        "Step '{}' references unknown next step '{}'",
                        step.name, next
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every rule of the definition, chain-wide first, then per step in order.
    pub fn validator(&self) -> Result<Validator, FlowIntentError> {
        let mut validator = Validator::new();
        for rule in self
            .params
            .iter()
            .chain(self.steps.iter().flat_map(|s| s.params.iter()))
        {
            rule.apply(&mut validator)?;
        }
        Ok(validator)
    }

    pub fn into_registry(self) -> Result<StepRegistry, FlowIntentError> {
        self.check_links()?;
        let validator = self.validator()?;

        let mut registry = StepRegistry::new();
        registry.extend_rules(validator);

        let initial = self.initial;
        for step in self.steps {
            let is_initial = initial.as_deref() == Some(step.name.as_str());
            registry.register(step.into_decl(is_initial))?;
        }
        tracing::debug!(
            "[ChainDefinition] Built registry with {} step(s)",
            registry.len()
        );
        Ok(registry)
    }
}

impl StepDef {
    fn into_decl(self, initial: bool) -> StepDecl {
        let StepDef {
            name,
            action,
            target,
            parent,
            extras,
            data,
            flags,
            next,
            ..
        } = self;

        let mut decl = StepDecl::new(name, action, move |previous, params| {
            let mut request = LaunchRequest::new(resolve_template(&target, previous, params));
            for (key, value) in &extras {
                request = request.with_extra(key, resolve_template(value, previous, params));
            }
            if let Some(data) = &data {
                request = request.with_data(resolve_template(data, previous, params));
            }
            for flag in &flags {
                request = request.with_flag(*flag);
            }
            request
        });

        if let Some(parent) = parent {
            decl = decl.parent(parent);
        }
        if let Some(next) = next {
            decl = decl.next(next);
        }
        if initial {
            decl = decl.initial();
        }
        decl
    }
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"))
}

/// Substitute `${...}` placeholders from the previous result and the chain params.
pub fn resolve_template(
    template: &str,
    previous: Option<&LaunchResult>,
    params: Option<&ParamSet>,
) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| {
            let key = &caps[1];
            lookup(key, previous, params).unwrap_or_else(|| format!("${{{}}}", key))
        })
        .to_string()
}

fn lookup(key: &str, previous: Option<&LaunchResult>, params: Option<&ParamSet>) -> Option<String> {
    if let Some(name) = key.strip_prefix("params.") {
        return params.and_then(|p| p.get::<String>(name));
    }
    if let Some(name) = key.strip_prefix("result.extra.") {
        return previous.and_then(|r| r.extra(name)).map(String::from);
    }
    match key {
        "result.status" => previous.map(|r| r.status.to_string()),
        "result.data" => previous.and_then(|r| r.data()).map(String::from),
        _ => None,
    }
}
