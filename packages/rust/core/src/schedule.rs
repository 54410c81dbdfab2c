//! Fixed-delay runner: run a job, sleep, repeat. Runs never overlap.

use std::future::Future;
use std::time::Duration;

use indexflow_shared::{Result, ScheduleConfig};
use tracing::{error, info, warn};

use crate::pipeline::RunReport;

#[derive(Debug, Clone)]
pub struct Scheduler {
    pub interval: Duration,
    /// Stop after this many runs; `None` runs until halted.
    pub max_runs: Option<usize>,
    /// Stop at the first failed run.
    pub halt_on_failure: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub runs: usize,
    pub failures: usize,
    /// True when the loop stopped because of a failed run.
    pub halted: bool,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_runs: None,
            halt_on_failure: true,
        }
    }

    pub fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_hours.saturating_mul(3600)),
            max_runs: None,
            halt_on_failure: config.halt_on_failure,
        }
    }

    pub fn with_max_runs(mut self, max_runs: usize) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    pub fn with_halt_on_failure(mut self, halt: bool) -> Self {
        self.halt_on_failure = halt;
        self
    }

    /// Drive `job` until `max_runs` is reached or a failure halts the loop.
    /// `job` receives the 1-based run number.
    pub async fn run<J, Fut>(&self, mut job: J) -> ScheduleSummary
    where
        J: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<RunReport>>,
    {
        let mut summary = ScheduleSummary::default();

        loop {
            summary.runs += 1;
            let run = summary.runs;

            let ok = match job(run).await {
                Ok(report) if report.succeeded() => {
                    info!(run, message = %report.message, "scheduled run succeeded");
                    true
                }
                Ok(report) => {
                    warn!(run, message = %report.message, "scheduled run failed");
                    false
                }
                Err(e) => {
                    error!(run, error = %e, "scheduled run could not be recorded");
                    false
                }
            };

            if !ok {
                summary.failures += 1;
                if self.halt_on_failure {
                    summary.halted = true;
                    break;
                }
            }
            if self.max_runs.is_some_and(|max| run >= max) {
                break;
            }

            info!(next_in_secs = self.interval.as_secs(), "waiting for next run");
            tokio::time::sleep(self.interval).await;
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexflow_shared::{IndexFlowError, RunId, RunKind, RunStatus};

    fn report(status: RunStatus) -> RunReport {
        RunReport {
            run_id: RunId::new(),
            kind: RunKind::Collect,
            status,
            message: status.to_string(),
            rows: 0,
            elapsed: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn stops_after_max_runs() {
        let scheduler = Scheduler::new(Duration::from_millis(1)).with_max_runs(3);
        let mut seen = Vec::new();
        let summary = scheduler
            .run(|n| {
                seen.push(n);
                async { Ok(report(RunStatus::Succeeded)) }
            })
            .await;

        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(
            summary,
            ScheduleSummary {
                runs: 3,
                failures: 0,
                halted: false
            }
        );
    }

    #[tokio::test]
    async fn halts_on_failed_run() {
        let scheduler = Scheduler::new(Duration::from_millis(1)).with_max_runs(5);
        let summary = scheduler
            .run(|n| async move {
                if n == 2 {
                    Ok(report(RunStatus::Failed))
                } else {
                    Ok(report(RunStatus::Succeeded))
                }
            })
            .await;

        assert_eq!(summary.runs, 2);
        assert_eq!(summary.failures, 1);
        assert!(summary.halted);
    }

    #[tokio::test]
    async fn keeps_going_when_not_halting() {
        let scheduler = Scheduler::new(Duration::from_millis(1))
            .with_max_runs(3)
            .with_halt_on_failure(false);
        let summary = scheduler
            .run(|n| async move {
                if n == 1 {
                    Err(IndexFlowError::Catalog("database is locked".into()))
                } else {
                    Ok(report(RunStatus::Succeeded))
                }
            })
            .await;

        assert_eq!(summary.runs, 3);
        assert_eq!(summary.failures, 1);
        assert!(!summary.halted);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_interval_between_runs() {
        let scheduler = Scheduler::new(Duration::from_secs(3600)).with_max_runs(2);
        let started = tokio::time::Instant::now();
        scheduler
            .run(|_| async { Ok(report(RunStatus::Succeeded)) })
            .await;
        assert_eq!(started.elapsed().as_secs(), 3600);
    }

    #[test]
    fn from_config_uses_hours() {
        let scheduler = Scheduler::from_config(&ScheduleConfig {
            interval_hours: 24,
            halt_on_failure: false,
        });
        assert_eq!(scheduler.interval, Duration::from_secs(86_400));
        assert!(!scheduler.halt_on_failure);
    }
}
