//! Per-call cancellation and deadline

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Caller-side controls for one search call.
///
/// Cancelling the token stops every in-flight backend call; a caller
/// deadline further tightens each phase deadline.
#[derive(Debug, Clone, Default)]
pub struct SearchContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl SearchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an existing token, e.g. a child of a request-scoped one
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Deadline for a phase starting now: the phase budget, capped by the
    /// caller's own deadline
    pub fn phase_deadline(&self, budget: Duration) -> Instant {
        let phase = Instant::now() + budget;
        match self.deadline {
            Some(caller) if caller < phase => caller,
            _ => phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_phase_deadline_capped_by_caller() {
        let ctx = SearchContext::new().with_timeout(Duration::from_millis(50));
        let now = Instant::now();
        assert_eq!(
            ctx.phase_deadline(Duration::from_millis(100)),
            now + Duration::from_millis(50)
        );
        assert_eq!(
            ctx.phase_deadline(Duration::from_millis(20)),
            now + Duration::from_millis(20)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_deadline_without_caller_deadline() {
        let ctx = SearchContext::new();
        let now = Instant::now();
        assert_eq!(
            ctx.phase_deadline(Duration::from_secs(2)),
            now + Duration::from_secs(2)
        );
    }

    #[test]
    fn test_cancel_shared_with_clones() {
        let ctx = SearchContext::new();
        let clone = ctx.clone();
        ctx.cancel();
        assert!(clone.is_cancelled());
    }
}
