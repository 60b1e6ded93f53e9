//! Submission coordinator: validates a submission, records it, has it
//! judged remotely and records the judgement.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::create_timestamp;
use crate::model::{Judgement, Language, Limits, Submission, TestCase, Verdict};
use crate::rpc::{JudgeDispatcher, JudgeRequest};

#[async_trait]
pub trait ProblemStore: Send + Sync {
    async fn problem_exists(&self, problem_id: i64) -> anyhow::Result<bool>;
    async fn test_cases(&self, problem_id: i64) -> anyhow::Result<Vec<TestCase>>;
    async fn limits(&self, problem_id: i64) -> anyhow::Result<Limits>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_exists(&self, user_id: i64) -> anyhow::Result<bool>;
    async fn increment_solved_count(&self, user_id: i64) -> anyhow::Result<()>;
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Returns the id assigned to the submission
    async fn save_submission(&self, submission: &Submission) -> anyhow::Result<i64>;
    /// Returns the id assigned to the judgement
    async fn save_judgement(&self, judgement: &Judgement) -> anyhow::Result<i64>;
    /// Whether any judgement of this user on this problem was accepted
    async fn find_prior_accepted(&self, user_id: i64, problem_id: i64) -> anyhow::Result<bool>;
}

/// Everything the coordinator reads and writes
pub trait Store: ProblemStore + UserStore + Persistence {}

impl<T: ProblemStore + UserStore + Persistence> Store for T {}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("user {0} not found")]
    UserNotFound(i64),
    #[error("problem {0} not found")]
    ProblemNotFound(i64),
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
    /// Database or dispatch failure; the message is for logs only
    #[error("system error: {0:#}")]
    System(#[from] anyhow::Error),
}

/// What the caller of [`SubmissionCoordinator::submit_code`] gets back
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SubmitOutcome {
    pub submission_id: i64,
    pub judgement_id: i64,
    pub verdict: Verdict,
    pub pass_num: u32,
    pub total_num: u32,
    /// Milliseconds
    pub runtime: u32,
    /// KiB
    pub memory_usage: u32,
    pub output: String,
}

pub struct SubmissionCoordinator {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn JudgeDispatcher>,
    // Serialises the check-then-credit of solved counts
    credit_lock: Mutex<()>,
}

impl SubmissionCoordinator {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<dyn JudgeDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            credit_lock: Mutex::new(()),
        }
    }

    /// Judges one submission end to end.
    ///
    /// Validation failures return before anything is written or any worker
    /// is contacted. Once the submission is saved, later failures leave it
    /// in place without a judgement.
    pub async fn submit_code(
        &self,
        user_id: i64,
        problem_id: i64,
        language: &str,
        code: &str,
    ) -> Result<SubmitOutcome, SubmitError> {
        if !self.store.user_exists(user_id).await? {
            return Err(SubmitError::UserNotFound(user_id));
        }
        if !self.store.problem_exists(problem_id).await? {
            return Err(SubmitError::ProblemNotFound(problem_id));
        }
        let language: Language = language
            .parse()
            .map_err(|_| SubmitError::UnsupportedLanguage(language.to_string()))?;

        let submission_id = self
            .store
            .save_submission(&Submission {
                user_id,
                problem_id,
                language,
                source_code: code.to_string(),
                submitted_at: create_timestamp(),
            })
            .await?;
        log::info!(
            "Saved submission {submission_id} of user {user_id} for problem {problem_id} \
             ({language})"
        );

        let request = self.build_job(user_id, problem_id, language, code).await?;
        let response = self.dispatcher.dispatch(&request).await?;
        log::info!(
            "Submission {submission_id} judged {} ({}/{})",
            response.status,
            response.pass_num,
            response.total_num
        );

        let judgement = Judgement {
            user_id,
            submission_id,
            problem_id,
            verdict: response.status,
            runtime_ms: response.runtime.max(0) as u32,
            memory_kb: response.memory_usage.max(0) as u32,
            output: response.output.unwrap_or_default(),
        };

        let judgement_id = {
            let _guard = self.credit_lock.lock().await;
            let already_solved = self.store.find_prior_accepted(user_id, problem_id).await?;
            let judgement_id = self.store.save_judgement(&judgement).await?;
            if judgement.verdict == Verdict::Accepted && !already_solved {
                self.store.increment_solved_count(user_id).await?;
                log::info!("User {user_id} solved problem {problem_id} for the first time");
            }
            judgement_id
        };

        Ok(SubmitOutcome {
            submission_id,
            judgement_id,
            verdict: judgement.verdict,
            pass_num: response.pass_num.max(0) as u32,
            total_num: response.total_num.max(0) as u32,
            runtime: judgement.runtime_ms,
            memory_usage: judgement.memory_kb,
            output: judgement.output,
        })
    }

    async fn build_job(
        &self,
        user_id: i64,
        problem_id: i64,
        language: Language,
        code: &str,
    ) -> anyhow::Result<JudgeRequest> {
        let cases = self.store.test_cases(problem_id).await?;
        let limits = self.store.limits(problem_id).await?;
        let (input, expected): (Vec<String>, Vec<String>) = cases
            .into_iter()
            .map(|case| (case.input, case.expected_output))
            .unzip();

        Ok(JudgeRequest {
            user_id,
            language,
            code: code.to_string(),
            total_num: i32::try_from(input.len())?,
            input,
            expected,
            time_limit: i32::try_from(limits.time_limit_ms)?,
            memory_limit: i32::try_from(limits.memory_limit_kb)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::rpc::JudgeResponse;
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct MemoryStore {
        users: SyncMutex<HashMap<i64, i64>>,
        problems: HashMap<i64, (Limits, Vec<TestCase>)>,
        submissions: SyncMutex<Vec<Submission>>,
        judgements: SyncMutex<Vec<Judgement>>,
    }

    impl MemoryStore {
        fn with_echo_problem() -> Self {
            let cases = vec![
                TestCase {
                    test_id: 1,
                    problem_id: 1,
                    input: "3\n".to_string(),
                    expected_output: "3\n".to_string(),
                },
                TestCase {
                    test_id: 2,
                    problem_id: 1,
                    input: "5\n".to_string(),
                    expected_output: "6\n".to_string(),
                },
            ];
            let limits = Limits {
                time_limit_ms: 2000,
                memory_limit_kb: 65536,
            };
            let store = Self {
                problems: HashMap::from([(1, (limits, cases))]),
                ..Default::default()
            };
            store.users.lock().insert(7, 0);
            store
        }

        fn solved_count(&self, user_id: i64) -> i64 {
            self.users.lock()[&user_id]
        }
    }

    #[async_trait]
    impl ProblemStore for MemoryStore {
        async fn problem_exists(&self, problem_id: i64) -> anyhow::Result<bool> {
            Ok(self.problems.contains_key(&problem_id))
        }

        async fn test_cases(&self, problem_id: i64) -> anyhow::Result<Vec<TestCase>> {
            Ok(self.problems[&problem_id].1.clone())
        }

        async fn limits(&self, problem_id: i64) -> anyhow::Result<Limits> {
            Ok(self.problems[&problem_id].0)
        }
    }

    #[async_trait]
    impl UserStore for MemoryStore {
        async fn user_exists(&self, user_id: i64) -> anyhow::Result<bool> {
            Ok(self.users.lock().contains_key(&user_id))
        }

        async fn increment_solved_count(&self, user_id: i64) -> anyhow::Result<()> {
            *self.users.lock().get_mut(&user_id).unwrap() += 1;
            Ok(())
        }
    }

    #[async_trait]
    impl Persistence for MemoryStore {
        async fn save_submission(&self, submission: &Submission) -> anyhow::Result<i64> {
            let mut submissions = self.submissions.lock();
            submissions.push(submission.clone());
            Ok(submissions.len() as i64)
        }

        async fn save_judgement(&self, judgement: &Judgement) -> anyhow::Result<i64> {
            let mut judgements = self.judgements.lock();
            judgements.push(judgement.clone());
            Ok(judgements.len() as i64)
        }

        async fn find_prior_accepted(&self, user_id: i64, problem_id: i64) -> anyhow::Result<bool> {
            Ok(self.judgements.lock().iter().any(|j| {
                j.user_id == user_id && j.problem_id == problem_id && j.verdict == Verdict::Accepted
            }))
        }
    }

    /// Answers every job with a fixed verdict and remembers what it saw
    struct FixedJudge {
        verdict: Verdict,
        calls: AtomicUsize,
        last: SyncMutex<Option<JudgeRequest>>,
    }

    impl FixedJudge {
        fn new(verdict: Verdict) -> Self {
            Self {
                verdict,
                calls: AtomicUsize::new(0),
                last: SyncMutex::new(None),
            }
        }
    }

    #[async_trait]
    impl JudgeDispatcher for FixedJudge {
        async fn dispatch(&self, request: &JudgeRequest) -> anyhow::Result<JudgeResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock() = Some(request.clone());
            let pass_num = if self.verdict == Verdict::Accepted {
                request.total_num
            } else {
                0
            };
            Ok(JudgeResponse {
                user_id: request.user_id,
                status: self.verdict,
                pass_num,
                total_num: request.total_num,
                memory_usage: 64,
                runtime: 12,
                output: None,
            })
        }
    }

    struct DownJudge;

    #[async_trait]
    impl JudgeDispatcher for DownJudge {
        async fn dispatch(&self, _request: &JudgeRequest) -> anyhow::Result<JudgeResponse> {
            anyhow::bail!("connection refused")
        }
    }

    fn coordinator(
        store: &Arc<MemoryStore>,
        judge: Arc<dyn JudgeDispatcher>,
    ) -> SubmissionCoordinator {
        SubmissionCoordinator::new(Arc::clone(store) as Arc<dyn Store>, judge)
    }

    #[tokio::test]
    async fn test_job_is_built_from_problem_cases_and_limits() {
        let store = Arc::new(MemoryStore::with_echo_problem());
        let judge = Arc::new(FixedJudge::new(Verdict::WrongAnswer));
        let coordinator = coordinator(&store, judge.clone());

        let outcome = coordinator.submit_code(7, 1, "C++", "code").await.unwrap();
        assert_eq!(outcome.verdict, Verdict::WrongAnswer);
        assert_eq!(outcome.total_num, 2);
        assert_eq!(outcome.runtime, 12);
        assert_eq!(outcome.memory_usage, 64);

        let request = judge.last.lock().clone().unwrap();
        assert_eq!(request.language, Language::Cpp);
        assert_eq!(request.input, vec!["3\n", "5\n"]);
        assert_eq!(request.expected, vec!["3\n", "6\n"]);
        assert_eq!(request.time_limit, 2000);
        assert_eq!(request.memory_limit, 65536);
        assert_eq!(request.total_num, 2);

        let judgements = store.judgements.lock();
        assert_eq!(judgements.len(), 1);
        assert_eq!(judgements[0].submission_id, outcome.submission_id);
    }

    #[tokio::test]
    async fn test_solved_count_is_credited_once() {
        let store = Arc::new(MemoryStore::with_echo_problem());
        let coordinator = coordinator(&store, Arc::new(FixedJudge::new(Verdict::Accepted)));

        for _ in 0..2 {
            let outcome = coordinator.submit_code(7, 1, "Go", "code").await.unwrap();
            assert_eq!(outcome.verdict, Verdict::Accepted);
        }

        assert_eq!(store.solved_count(7), 1);
        assert_eq!(store.judgements.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_submission_is_not_credited() {
        let store = Arc::new(MemoryStore::with_echo_problem());
        let judge = Arc::new(FixedJudge::new(Verdict::TimeLimitExceeded));
        let coordinator = coordinator(&store, judge);

        coordinator.submit_code(7, 1, "Java", "code").await.unwrap();
        assert_eq!(store.solved_count(7), 0);
    }

    #[tokio::test]
    async fn test_unsupported_language_has_no_side_effects() {
        let store = Arc::new(MemoryStore::with_echo_problem());
        let judge = Arc::new(FixedJudge::new(Verdict::Accepted));
        let coordinator = coordinator(&store, judge.clone());

        let err = coordinator.submit_code(7, 1, "Rust", "fn main() {}").await.unwrap_err();
        assert!(matches!(err, SubmitError::UnsupportedLanguage(ref l) if l == "Rust"));
        assert!(store.submissions.lock().is_empty());
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_user_and_problem() {
        let store = Arc::new(MemoryStore::with_echo_problem());
        let judge = Arc::new(FixedJudge::new(Verdict::Accepted));
        let coordinator = coordinator(&store, judge.clone());

        let err = coordinator.submit_code(8, 1, "Go", "").await.unwrap_err();
        assert!(matches!(err, SubmitError::UserNotFound(8)));

        let err = coordinator.submit_code(7, 2, "Go", "").await.unwrap_err();
        assert!(matches!(err, SubmitError::ProblemNotFound(2)));

        assert!(store.submissions.lock().is_empty());
        assert_eq!(judge.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_keeps_submission() {
        let store = Arc::new(MemoryStore::with_echo_problem());
        let coordinator = coordinator(&store, Arc::new(DownJudge));

        let err = coordinator.submit_code(7, 1, "Python", "print(1)").await.unwrap_err();
        assert!(matches!(err, SubmitError::System(_)));
        assert_eq!(store.submissions.lock().len(), 1);
        assert!(store.judgements.lock().is_empty());
    }
}
