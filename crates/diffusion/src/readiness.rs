//! Readiness polling.
//!
//! Each tick issues one probe. A failed probe schedules exactly one retry a
//! fixed [`POLL_INTERVAL`] later and charges one interval against the budget,
//! however long the probe itself took. Once the charged time reaches the
//! budget the poller times out without probing again.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::DiffusionError;

/// Delay between failed probes
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A single health check against the server.
#[allow(async_fn_in_trait)]
pub trait HealthProbe {
    /// Probe once; `Ok` carries the response body of a healthy server
    async fn probe(&self) -> Result<String, DiffusionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Polling,
    Ready,
    TimedOut,
}

/// Terminal result of a polling run.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessOutcome {
    pub ready: bool,
    /// Probe body when ready, last error when timed out
    pub detail: String,
    /// Probes issued
    pub ticks: u32,
    /// Retries scheduled
    pub retries: u32,
    /// Budget charged, one interval per failed probe
    pub elapsed: Duration,
}

impl ReadinessOutcome {
    pub fn into_result(self) -> Result<String, DiffusionError> {
        if self.ready {
            Ok(self.detail)
        } else {
            Err(DiffusionError::Timeout(self.elapsed))
        }
    }
}

/// What to do after recording a probe result.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeAction {
    Finished(ReadinessOutcome),
    RetryAfter(Duration),
}

/// Polling state machine, independent of any timer.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    budget: Duration,
    interval: Duration,
    elapsed: Duration,
    state: ReadinessState,
    ticks: u32,
    retries: u32,
    last_error: Option<String>,
}

impl ReadinessPoller {
    pub fn new(budget: Duration) -> Self {
        Self::with_interval(budget, POLL_INTERVAL)
    }

    pub fn with_interval(budget: Duration, interval: Duration) -> Self {
        Self {
            budget,
            interval,
            elapsed: Duration::ZERO,
            state: ReadinessState::Polling,
            ticks: 0,
            retries: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> ReadinessState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Start a tick.
    ///
    /// Returns `None` when the caller should probe, or the timed-out outcome
    /// once the budget is spent.
    pub fn begin_tick(&mut self) -> Option<ReadinessOutcome> {
        match self.state {
            ReadinessState::Polling if self.elapsed >= self.budget => {
                self.state = ReadinessState::TimedOut;
                let detail = match &self.last_error {
                    Some(err) => format!("timed out after {:?}: {err}", self.elapsed),
                    None => format!("timed out after {:?}", self.elapsed),
                };
                Some(self.outcome(false, detail))
            }
            ReadinessState::Polling => {
                self.ticks += 1;
                None
            }
            ReadinessState::Ready | ReadinessState::TimedOut => {
                Some(self.outcome(self.state == ReadinessState::Ready, String::new()))
            }
        }
    }

    /// Record the result of the probe issued for the current tick.
    pub fn record_probe(&mut self, result: Result<String, DiffusionError>) -> ProbeAction {
        match result {
            Ok(body) => {
                self.state = ReadinessState::Ready;
                ProbeAction::Finished(self.outcome(true, body))
            }
            Err(e) => {
                self.retries += 1;
                self.elapsed += self.interval;
                debug!("Server not ready yet ({:?} elapsed): {}", self.elapsed, e);
                self.last_error = Some(e.to_string());
                ProbeAction::RetryAfter(self.interval)
            }
        }
    }

    fn outcome(&self, ready: bool, detail: String) -> ReadinessOutcome {
        ReadinessOutcome {
            ready,
            detail,
            ticks: self.ticks,
            retries: self.retries,
            elapsed: self.elapsed,
        }
    }
}

/// Probe until the server is healthy or `budget` is spent.
///
/// Resolves once with the terminal outcome; only cancellation is an `Err`.
pub async fn wait_until_ready<P: HealthProbe>(
    probe: &P,
    budget: Duration,
    cancel: &CancellationToken,
) -> Result<ReadinessOutcome, DiffusionError> {
    let mut poller = ReadinessPoller::new(budget);

    loop {
        if let Some(outcome) = poller.begin_tick() {
            warn!("Server not ready: {}", outcome.detail);
            return Ok(outcome);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DiffusionError::Cancelled),
            result = probe.probe() => result,
        };

        match poller.record_probe(result) {
            ProbeAction::Finished(outcome) => {
                info!("Server ready after {} probe(s)", outcome.ticks);
                return Ok(outcome);
            }
            ProbeAction::RetryAfter(delay) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(DiffusionError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Probe that replays scripted answers, then keeps failing.
    struct ScriptedProbe {
        answers: Mutex<VecDeque<bool>>,
        calls: AtomicU32,
    }

    impl ScriptedProbe {
        fn new(answers: &[bool]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().copied().collect()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> Result<String, DiffusionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let healthy = self.answers.lock().unwrap().pop_front().unwrap_or(false);
            if healthy {
                Ok(r#"{"system":{}}"#.to_string())
            } else {
                Err(DiffusionError::Transport("connection refused".into()))
            }
        }
    }

    #[test]
    fn test_state_machine_fractional_budget() {
        let mut poller = ReadinessPoller::new(Duration::from_secs_f32(2.5));

        for _ in 0..3 {
            assert!(poller.begin_tick().is_none());
            let action = poller.record_probe(Err(DiffusionError::Transport("down".into())));
            assert_eq!(action, ProbeAction::RetryAfter(POLL_INTERVAL));
        }

        let outcome = poller.begin_tick().expect("timed out");
        assert!(!outcome.ready);
        assert!(outcome.detail.contains("down"));
        assert_eq!(poller.state(), ReadinessState::TimedOut);
        assert_eq!(outcome.ticks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_times_out_after_three_retries() {
        let probe = ScriptedProbe::new(&[]);
        let start = tokio::time::Instant::now();

        let outcome = wait_until_ready(&probe, Duration::from_secs(3), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!outcome.ready);
        assert_eq!(outcome.retries, 3);
        assert_eq!(outcome.ticks, 3);
        assert_eq!(probe.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert!(matches!(outcome.into_result(), Err(DiffusionError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_second_tick() {
        let probe = ScriptedProbe::new(&[false, true]);

        let outcome = wait_until_ready(&probe, Duration::from_secs(3), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.ready);
        assert_eq!(outcome.ticks, 2);
        assert_eq!(outcome.retries, 1);
        assert_eq!(probe.calls(), 2);
        assert_eq!(outcome.into_result().unwrap(), r#"{"system":{}}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_budget_never_probes() {
        let probe = ScriptedProbe::new(&[true]);
        let outcome = wait_until_ready(&probe, Duration::ZERO, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.ready);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let probe = ScriptedProbe::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = wait_until_ready(&probe, Duration::from_secs(10), &cancel).await;
        assert!(matches!(result, Err(DiffusionError::Cancelled)));
        assert_eq!(probe.calls(), 0);
    }
}
