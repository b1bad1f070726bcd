//! The seam between the chain engine and the hosting platform.
//!
//! The engine never talks to screens directly. It hands each request to a
//! [`Launcher`] together with a [`ResultSink`]; the platform keeps the sink
//! until the launched screen finishes and then delivers exactly one result
//! through it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::step::StepId;
use crate::models::{LaunchMode, LaunchRequest, LaunchResult};

/// Correlates a dispatched request with the result that answers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A result travelling from the platform to the engine's queue.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub token: CorrelationToken,
    pub result: LaunchResult,
}

/// One-shot reply capability for a single dispatched request.
///
/// Dropping a sink without delivering leaves the chain waiting; platforms
/// that dismiss a screen without a result should deliver
/// [`LaunchResult::canceled`].
pub struct ResultSink {
    token: CorrelationToken,
    tx: mpsc::UnboundedSender<Delivery>,
    open: Arc<AtomicBool>,
}

impl fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSink")
            .field("token", &self.token)
            .field("open", &self.is_open())
            .finish()
    }
}

impl ResultSink {
    pub(crate) fn new(
        token: CorrelationToken,
        tx: mpsc::UnboundedSender<Delivery>,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self { token, tx, open }
    }

    pub fn token(&self) -> CorrelationToken {
        self.token
    }

    /// False once the owning chain run has been torn down or has completed.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Hand the result to the engine. Never blocks. Returns `false` when the
    /// run is no longer accepting results; the result is dropped.
    pub fn deliver(self, result: LaunchResult) -> bool {
        if !self.is_open() {
            tracing::debug!(
                "[ResultSink] Dropping result for {}: chain no longer running",
                self.token
            );
            return false;
        }
        self.tx
            .send(Delivery {
                token: self.token,
                result,
            })
            .is_ok()
    }

    /// A sink on the same queue carrying a different token.
    #[cfg(test)]
    pub(crate) fn forge(&self, token: CorrelationToken) -> ResultSink {
        ResultSink::new(token, self.tx.clone(), self.open.clone())
    }
}

/// A request the engine wants launched, with the capability to answer it.
#[derive(Debug)]
pub struct Dispatch {
    pub token: CorrelationToken,
    pub step: StepId,
    pub request: LaunchRequest,
    pub mode: LaunchMode,
    pub reply: ResultSink,
}

/// The platform's launch primitive.
pub trait Launcher: Send + Sync {
    /// Launch a screen without expecting a result.
    fn launch(&self, request: LaunchRequest, mode: LaunchMode);

    /// Launch a screen whose result must come back through `dispatch.reply`.
    fn launch_for_result(&self, dispatch: Dispatch);
}

impl<L: Launcher + ?Sized> Launcher for Arc<L> {
    fn launch(&self, request: LaunchRequest, mode: LaunchMode) {
        (**self).launch(request, mode)
    }

    fn launch_for_result(&self, dispatch: Dispatch) {
        (**self).launch_for_result(dispatch)
    }
}
