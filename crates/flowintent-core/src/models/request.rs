use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Platform result code for a screen that finished successfully.
pub const RESULT_OK: i32 = -1;
/// Platform result code for a screen that was dismissed without a result.
pub const RESULT_CANCELED: i32 = 0;
/// First result code available for application-defined outcomes.
pub const RESULT_FIRST_USER: i32 = 1;

/// Standard action strings understood by most platforms.
pub const ACTION_VIEW: &str = "android.intent.action.VIEW";
pub const ACTION_PICK: &str = "android.intent.action.PICK";

/// Extra key that links a launched screen back to its value flow.
pub const FLOW_ID_EXTRA: &str = "flowId";

/// Launch flags that alter how the platform places the new screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchFlag {
    ClearTop,
    SingleTop,
    NewTask,
}

/// An addressed request to transition to another screen.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    /// Target screen identifier. Empty when the platform resolves by action.
    #[serde(default)]
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, String>,

    /// Data reference, usually a URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub flags: BTreeSet<LaunchFlag>,
}

impl LaunchRequest {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// A request addressed only by action, for the platform to resolve.
    pub fn for_action(action: impl Into<String>) -> Self {
        Self {
            action: Some(action.into()),
            ..Default::default()
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extras.insert(key.into(), value.to_string());
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn with_flag(mut self, flag: LaunchFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extras.get(key).map(|s| s.as_str())
    }
}

/// The asynchronous outcome of a dispatched [`LaunchRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    pub status: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<LaunchRequest>,
}

impl LaunchResult {
    pub fn new(status: i32, payload: Option<LaunchRequest>) -> Self {
        Self { status, payload }
    }

    pub fn ok(payload: LaunchRequest) -> Self {
        Self::new(RESULT_OK, Some(payload))
    }

    pub fn canceled() -> Self {
        Self::new(RESULT_CANCELED, None)
    }

    pub fn is_ok(&self) -> bool {
        self.status == RESULT_OK
    }

    /// The payload's data reference, if any.
    pub fn data(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.data.as_deref())
    }

    /// An extra from the payload, if any.
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.extra(key))
    }
}

/// How a request is placed on the platform's back stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum LaunchMode {
    /// Launch the screen on top of the current one.
    Direct,
    /// Launch the screen inside a synthetic back stack ending at `parent`.
    ParentStack { parent: String },
}

impl LaunchMode {
    pub fn from_parent(parent: Option<&str>) -> Self {
        match parent {
            Some(p) if !p.is_empty() => LaunchMode::ParentStack {
                parent: p.to_string(),
            },
            _ => LaunchMode::Direct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_accessors() {
        let result = LaunchResult::ok(
            LaunchRequest::default()
                .with_data("content://images/7")
                .with_extra("uri", "content://images/7"),
        );
        assert!(result.is_ok());
        assert_eq!(result.data(), Some("content://images/7"));
        assert_eq!(result.extra("uri"), Some("content://images/7"));
        assert_eq!(result.extra("missing"), None);
        assert_eq!(LaunchResult::canceled().data(), None);
    }

    #[test]
    fn test_result_from_yaml() {
        let yaml = r#"
status: -1
payload:
  data: "content://images/1"
  extras:
    key: "value"
"#;
        let result: LaunchResult = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(result.status, RESULT_OK);
        assert_eq!(result.extra("key"), Some("value"));
        assert_eq!(result.payload.unwrap().target, "");
    }

    #[test]
    fn test_launch_mode_from_parent() {
        assert_eq!(LaunchMode::from_parent(None), LaunchMode::Direct);
        assert_eq!(LaunchMode::from_parent(Some("")), LaunchMode::Direct);
        assert_eq!(
            LaunchMode::from_parent(Some("app.Main")),
            LaunchMode::ParentStack {
                parent: "app.Main".to_string()
            }
        );
    }
}
