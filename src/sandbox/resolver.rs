use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::model::Verdict;

use super::{Artifact, CaseInput, CaseReport, TestOutcome, TestRunner};

/// Final verdict of one job plus aggregate statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub verdict: Verdict,
    pub pass_num: u32,
    pub total_num: u32,
    pub runtime_ms: u32,
    pub memory_kb: u32,
    pub output: String,
}

/// Shared by all case tasks; only passing cases are counted
#[derive(Debug, Default, Clone)]
struct PassTally {
    passed: u32,
    max_elapsed: Duration,
    max_memory_kb: i64,
}

impl PassTally {
    fn record(&mut self, report: &CaseReport) {
        self.passed += 1;
        self.max_elapsed = self.max_elapsed.max(report.elapsed);
        self.max_memory_kb = self.max_memory_kb.max(report.memory_delta_kb);
    }
}

#[derive(Debug)]
struct Failure {
    index: usize,
    verdict: Verdict,
    report: Option<CaseReport>,
    output: String,
}

enum Decision {
    Failed(Failure),
    AllPassed,
    BudgetElapsed,
}

/// Runs every case concurrently against `artifact` and reduces the outcomes
/// to one verdict.
///
/// The first case to fail decides the verdict, whatever kind of failure it
/// is. Otherwise the job is accepted if all cases pass within
/// `time_budget` and exceeds the time limit if the budget runs out first.
/// Every case task is cancelled and joined before this returns, so no child
/// process outlives the call.
pub async fn resolve<R>(
    runner: Arc<R>,
    artifact: Arc<Artifact>,
    cases: Vec<CaseInput>,
    time_budget: Duration,
    memory_limit_kb: u32,
) -> Resolution
where
    R: TestRunner + ?Sized + 'static,
{
    let total = cases.len() as u32;
    if total == 0 {
        return Resolution {
            verdict: Verdict::SystemError,
            pass_num: 0,
            total_num: 0,
            runtime_ms: 0,
            memory_kb: 0,
            output: "job has no test cases".to_string(),
        };
    }

    let tally = Arc::new(Mutex::new(PassTally::default()));
    let all_passed = Arc::new(Notify::new());
    let (failure_tx, mut failure_rx) = mpsc::channel::<Failure>(cases.len());
    let token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    for case in cases {
        let runner = Arc::clone(&runner);
        let artifact = Arc::clone(&artifact);
        let tally = Arc::clone(&tally);
        let all_passed = Arc::clone(&all_passed);
        let failure_tx = failure_tx.clone();
        let token = token.child_token();

        tasks.spawn(async move {
            let report = tokio::select! {
                _ = token.cancelled() => return,
                report = runner.run(&artifact, &case, memory_limit_kb) => report,
            };

            let failure = match report {
                Ok(report) if report.outcome == TestOutcome::Pass => {
                    let mut tally = tally.lock();
                    tally.record(&report);
                    if tally.passed == total {
                        all_passed.notify_one();
                    }
                    return;
                }
                Ok(report) => Failure {
                    index: case.index,
                    verdict: verdict_of(report.outcome),
                    output: report.output.clone(),
                    report: Some(report),
                },
                Err(e) => {
                    log::error!("Case {} could not be judged: {e:#}", case.index);
                    Failure {
                        index: case.index,
                        verdict: Verdict::SystemError,
                        report: None,
                        output: format!("{e:#}"),
                    }
                }
            };
            // Capacity covers one failure per case
            let _ = failure_tx.try_send(failure);
        });
    }
    drop(failure_tx);

    let decision = tokio::select! {
        Some(failure) = failure_rx.recv() => Decision::Failed(failure),
        _ = all_passed.notified() => Decision::AllPassed,
        _ = tokio::time::sleep(time_budget) => Decision::BudgetElapsed,
    };
    let snapshot = tally.lock().clone();

    token.cancel();
    tasks.shutdown().await;

    let mut max_elapsed = snapshot.max_elapsed;
    let mut max_memory_kb = snapshot.max_memory_kb;
    let (verdict, output) = match decision {
        Decision::Failed(failure) => {
            log::debug!(
                "Case {} decided the verdict: {}",
                failure.index,
                failure.verdict
            );
            if let Some(report) = &failure.report {
                max_elapsed = max_elapsed.max(report.elapsed);
                max_memory_kb = max_memory_kb.max(report.memory_delta_kb);
            }
            (failure.verdict, failure.output)
        }
        Decision::AllPassed => (Verdict::Accepted, String::new()),
        Decision::BudgetElapsed if snapshot.passed == total => (Verdict::Accepted, String::new()),
        Decision::BudgetElapsed => (Verdict::TimeLimitExceeded, String::new()),
    };

    Resolution {
        verdict,
        pass_num: snapshot.passed,
        total_num: total,
        runtime_ms: max_elapsed.as_millis().min(u32::MAX as u128) as u32,
        memory_kb: max_memory_kb.clamp(0, u32::MAX as i64) as u32,
        output,
    }
}

fn verdict_of(outcome: TestOutcome) -> Verdict {
    match outcome {
        TestOutcome::Pass => Verdict::Accepted,
        TestOutcome::WrongAnswer => Verdict::WrongAnswer,
        TestOutcome::RuntimeError => Verdict::RuntimeError,
        TestOutcome::MemoryLimitExceeded => Verdict::MemoryLimitExceeded,
    }
}
