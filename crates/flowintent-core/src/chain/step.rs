use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deeplink::ParamSet;
use crate::models::{LaunchMode, LaunchRequest, LaunchResult};

/// Builds a step's request from the previous step's result and the chain's params.
pub type RequestBuilder =
    Box<dyn Fn(Option<&LaunchResult>, Option<&ParamSet>) -> LaunchRequest + Send + Sync>;

/// Called synchronously with the result of the step's request.
pub type ResultHandler = Box<dyn Fn(&LaunchResult) + Send + Sync>;

/// Step identifier, unique within a chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StepId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One request/response unit in a chain.
pub struct Step {
    id: StepId,
    build: RequestBuilder,
    on_result: Option<ResultHandler>,
    next: Option<StepId>,
    parent: Option<String>,
    /// Applied when the builder leaves the request's action unset.
    default_action: Option<String>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("has_handler", &self.on_result.is_some())
            .field("next", &self.next)
            .field("parent", &self.parent)
            .field("default_action", &self.default_action)
            .finish()
    }
}

impl Step {
    pub fn new<F>(id: impl Into<StepId>, builder: F) -> Self
    where
        F: Fn(Option<&LaunchResult>, Option<&ParamSet>) -> LaunchRequest + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            build: Box::new(builder),
            on_result: None,
            next: None,
            parent: None,
            default_action: None,
        }
    }

    pub(crate) fn from_parts(
        id: StepId,
        build: RequestBuilder,
        on_result: Option<ResultHandler>,
        next: Option<StepId>,
        parent: Option<String>,
        default_action: Option<String>,
    ) -> Self {
        Self {
            id,
            build,
            on_result,
            next,
            parent: parent.filter(|p| !p.is_empty()),
            default_action: default_action.filter(|a| !a.is_empty()),
        }
    }

    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LaunchResult) + Send + Sync + 'static,
    {
        self.on_result = Some(Box::new(handler));
        self
    }

    pub fn with_next(mut self, next: impl Into<StepId>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into()).filter(|p: &String| !p.is_empty());
        self
    }

    pub fn id(&self) -> &StepId {
        &self.id
    }

    pub fn next(&self) -> Option<&StepId> {
        self.next.as_ref()
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn has_handler(&self) -> bool {
        self.on_result.is_some()
    }

    pub(crate) fn set_handler(&mut self, handler: ResultHandler) {
        self.on_result = Some(handler);
    }

    pub fn launch_mode(&self) -> LaunchMode {
        LaunchMode::from_parent(self.parent.as_deref())
    }

    pub fn build_request(
        &self,
        previous: Option<&LaunchResult>,
        params: Option<&ParamSet>,
    ) -> LaunchRequest {
        let mut request = (self.build)(previous, params);
        if request.action.is_none() {
            request.action = self.default_action.clone();
        }
        request
    }

    pub(crate) fn handle(&self, result: &LaunchResult) {
        if let Some(handler) = &self.on_result {
            handler(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ACTION_PICK;

    #[test]
    fn test_build_request_applies_default_action() {
        let step = Step::from_parts(
            StepId::from("pick"),
            Box::new(|_, _| LaunchRequest::new("app.Picker")),
            None,
            None,
            Some(String::new()),
            Some(ACTION_PICK.to_string()),
        );
        let request = step.build_request(None, None);
        assert_eq!(request.action.as_deref(), Some(ACTION_PICK));
        assert_eq!(step.launch_mode(), LaunchMode::Direct);
    }

    #[test]
    fn test_builder_sees_previous_result_and_params() {
        let step = Step::new("view", |prev, params| {
            let uri = prev.and_then(|r| r.data()).unwrap_or_default().to_string();
            let id = params.and_then(|p| p.get::<String>("id")).unwrap_or_default();
            LaunchRequest::new("app.Viewer").with_data(uri).with_extra("id", id)
        })
        .with_parent("app.Main");

        let result = LaunchResult::ok(LaunchRequest::default().with_data("content://1"));
        let params = ParamSet::new().with("id", "7");
        let request = step.build_request(Some(&result), Some(&params));
        assert_eq!(request.data.as_deref(), Some("content://1"));
        assert_eq!(request.extra("id"), Some("7"));
        assert_eq!(
            step.launch_mode(),
            LaunchMode::ParentStack {
                parent: "app.Main".to_string()
            }
        );
    }
}
