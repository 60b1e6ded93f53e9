use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::model::Verdict;
use crate::registry::{Instance, RegistryClient};
use crate::rpc::{JudgeRequest, JudgeResponse};
use crate::sandbox::{
    self, Artifact, CaseInput, Compilation, ProcessRunner, TestRunner, Toolchains,
};

/// The judging half of the pipeline: compile, then resolve a verdict.
///
/// Holds no per-job state; concurrent jobs each get their own working
/// directory under `work_root`.
pub struct JudgeService {
    toolchains: Toolchains,
    work_root: PathBuf,
    compile_timeout: Duration,
    runner: Arc<dyn TestRunner>,
}

impl JudgeService {
    pub fn new(
        toolchains: Toolchains,
        work_root: PathBuf,
        compile_timeout: Duration,
    ) -> Result<Self> {
        fs::create_dir_all(&work_root)
            .with_context(|| format!("failed to create {}", work_root.display()))?;
        Ok(Self {
            toolchains,
            work_root,
            compile_timeout,
            runner: Arc::new(ProcessRunner),
        })
    }

    pub fn from_config(config: &WorkerConfig, toolchains: Toolchains) -> Result<Self> {
        let work_root = match &config.work_root {
            Some(path) => path.clone(),
            None => default_work_root()?,
        };
        Self::new(
            toolchains,
            work_root,
            Duration::from_secs(config.compile_timeout_secs),
        )
    }

    /// Replaces how test cases are run
    pub fn with_runner(mut self, runner: Arc<dyn TestRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Judges one job. Judged failures and worker faults alike come back as
    /// a response; nothing here is an error to the caller.
    pub async fn submit_code(&self, request: JudgeRequest) -> JudgeResponse {
        if let Err(e) = request.validate() {
            log::warn!("Rejected malformed job of user {}: {e}", request.user_id);
            return JudgeResponse::system_error(&request, e.to_string());
        }

        let start_time = Instant::now();
        let response = match self.judge(&request).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Judging job of user {} failed: {e:#}", request.user_id);
                JudgeResponse::system_error(&request, "internal error")
            }
        };
        log::info!(
            "Job of user {} finished as {} ({}/{}) in {}ms",
            request.user_id,
            response.status,
            response.pass_num,
            response.total_num,
            start_time.elapsed().as_millis()
        );
        response
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<JudgeResponse> {
        let workdir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", request.user_id))
            .tempdir_in(&self.work_root)
            .context("failed to create job directory")?;
        log::debug!(
            "Job of user {} runs in {}",
            request.user_id,
            workdir.path().display()
        );

        let toolchain = self.toolchains.get(request.language);
        let compilation =
            sandbox::compile(toolchain, workdir.path(), &request.code, self.compile_timeout)
                .await?;

        let artifact = match compilation {
            Compilation::Success(artifact) => artifact,
            Compilation::Failure { diagnostics } => {
                return Ok(JudgeResponse {
                    user_id: request.user_id,
                    status: Verdict::CompileError,
                    pass_num: 0,
                    total_num: request.total_num,
                    memory_usage: 0,
                    runtime: 0,
                    output: Some(diagnostics),
                });
            }
        };

        let cases = request
            .input
            .iter()
            .zip(&request.expected)
            .enumerate()
            .map(|(index, (input, expected))| CaseInput {
                index,
                input: input.clone(),
                expected: expected.clone(),
            })
            .collect();

        let resolution = sandbox::resolve(
            Arc::clone(&self.runner),
            Arc::new(artifact),
            cases,
            Duration::from_millis(request.time_limit as u64),
            request.memory_limit as u32,
        )
        .await;

        Ok(JudgeResponse {
            user_id: request.user_id,
            status: resolution.verdict,
            pass_num: resolution.pass_num as i32,
            total_num: resolution.total_num as i32,
            memory_usage: resolution.memory_kb.min(i32::MAX as u32) as i32,
            runtime: resolution.runtime_ms.min(i32::MAX as u32) as i32,
            output: (!resolution.output.is_empty()).then_some(resolution.output),
        })
    }
}

fn default_work_root() -> Result<PathBuf> {
    use directories::ProjectDirs;

    let proj_dirs =
        ProjectDirs::from("", "", "oj").ok_or_else(|| anyhow!("Unable to find user directory"))?;
    Ok(proj_dirs.cache_dir().join("jobs"))
}

/// Keeps `instance` registered under `service` until `token` is cancelled,
/// then deregisters it.
///
/// A failed heartbeat is logged and retried on the next tick; the lease only
/// lapses if the registry stays unreachable for a whole TTL.
pub async fn announce(
    id: String,
    address: String,
    service: String,
    registry: RegistryClient,
    heartbeat: Duration,
    token: CancellationToken,
) -> Result<()> {
    let instance = Instance { id, address };
    let mut interval = tokio::time::interval(heartbeat);
    let mut registered = false;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {} received shutdown signal, deregistering", instance.id);
                break;
            }

            _ = interval.tick() => {
                match registry.register(&service, &instance).await {
                    Ok(()) if !registered => {
                        log::info!("Worker {} announced at {}", instance.id, instance.address);
                        registered = true;
                    }
                    Ok(()) => log::trace!("Heartbeat of worker {} sent", instance.id),
                    Err(e) => log::warn!("Heartbeat of worker {} failed: {e:#}", instance.id),
                }
            }
        }
    }

    if registered {
        registry.deregister(&service, &instance.id).await?;
    }
    log::info!("Worker {} has shut down gracefully", instance.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::model::Language;
    use crate::sandbox::{CaseReport, Toolchain};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn shell_service(root: &std::path::Path) -> JudgeService {
        let toolchains = Toolchains::default().with(
            Language::Python,
            Toolchain {
                file_name: "main.sh".to_string(),
                compile: Some(vec!["sh".into(), "-n".into(), "%INPUT%".into()]),
                run: vec!["sh".into(), "%INPUT%".into()],
            },
        );
        JudgeService::new(toolchains, root.to_path_buf(), Duration::from_secs(10)).unwrap()
    }

    const ECHO_SLOW_ON_5: &str = "read x\n[ \"$x\" = 5 ] && sleep 0.3\necho \"$x\"\n";

    fn job(code: &str, cases: &[(&str, &str)]) -> JudgeRequest {
        JudgeRequest {
            user_id: 42,
            language: Language::Python,
            code: code.to_string(),
            input: cases.iter().map(|(i, _)| i.to_string()).collect(),
            expected: cases.iter().map(|(_, e)| e.to_string()).collect(),
            time_limit: 2000,
            memory_limit: 1 << 30,
            total_num: cases.len() as i32,
        }
    }

    #[tokio::test]
    async fn test_echo_program_gets_wrong_answer_on_second_case() {
        let root = tempfile::tempdir().unwrap();
        let service = shell_service(root.path());
        // Echoes verbatim; the failing case is slowed so the passing one lands first
        let response = service
            .submit_code(job(ECHO_SLOW_ON_5, &[("3\n", "3\n"), ("5\n", "6\n")]))
            .await;

        assert_eq!(response.status, Verdict::WrongAnswer);
        assert_eq!(response.pass_num, 1);
        assert_eq!(response.total_num, 2);
        assert_eq!(response.output.as_deref(), Some("5\n"));
    }

    /// Runs cases for real and counts how many it was handed
    #[derive(Default)]
    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TestRunner for CountingRunner {
        async fn run(
            &self,
            artifact: &Artifact,
            case: &CaseInput,
            memory_limit_kb: u32,
        ) -> Result<CaseReport> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ProcessRunner.run(artifact, case, memory_limit_kb).await
        }
    }

    #[tokio::test]
    async fn test_compile_error_runs_no_case() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(CountingRunner::default());
        let service = shell_service(root.path()).with_runner(runner.clone());
        let response = service
            .submit_code(job("if then fi (\n", &[("3\n", "3\n"), ("4\n", "4\n")]))
            .await;

        assert_eq!(response.status, Verdict::CompileError);
        assert_eq!(response.pass_num, 0);
        assert!(response.output.is_some());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);

        let response = service
            .submit_code(job("cat\n", &[("3\n", "3\n"), ("4\n", "4\n")]))
            .await;
        assert_eq!(response.status, Verdict::Accepted);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_accepted_and_directory_removed() {
        let root = tempfile::tempdir().unwrap();
        let service = shell_service(root.path());
        let response = service
            .submit_code(job("cat\n", &[("1\n", "1\n"), ("2\n", "2\n")]))
            .await;

        assert_eq!(response.status, Verdict::Accepted);
        assert_eq!(response.pass_num, 2);
        assert_eq!(response.output, None);
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_slow_program_exceeds_time_limit() {
        let root = tempfile::tempdir().unwrap();
        let service = shell_service(root.path());
        let mut request = job("sleep 5\n", &[("1\n", "1\n")]);
        request.time_limit = 200;

        let start = Instant::now();
        let response = service.submit_code(request).await;
        assert_eq!(response.status, Verdict::TimeLimitExceeded);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_malformed_job_is_system_error() {
        let root = tempfile::tempdir().unwrap();
        let service = shell_service(root.path());
        let mut request = job("cat\n", &[("1\n", "1\n")]);
        request.expected.push("extra".to_string());

        let response = service.submit_code(request).await;
        assert_eq!(response.status, Verdict::SystemError);
    }
}
