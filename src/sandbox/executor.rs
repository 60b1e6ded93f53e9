use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::memory;
use super::process::{ProcessGroup, read_head};
use super::{
    Artifact, CaseInput, CaseReport, OUTPUT_LIMIT, TestOutcome, TestRunner, truncate_output,
};

/// Runs test cases as plain child processes of the worker.
///
/// There is no isolation: the program sees the worker's filesystem and
/// environment. Each run gets its own process group, which is killed once
/// the run returns or an in-flight `run` is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl TestRunner for ProcessRunner {
    async fn run(
        &self,
        artifact: &Artifact,
        case: &CaseInput,
        memory_limit_kb: u32,
    ) -> Result<CaseReport> {
        let output_path = artifact.dir.join(format!("{}.out", case.index));

        let before = memory::resident_kb();
        let start_time = Instant::now();
        let status = execute_program(artifact, &case.input, &output_path).await;
        let elapsed = start_time.elapsed();
        let after = memory::resident_kb();

        let exited_ok = match &status {
            Ok(exit_status) => exit_status.success(),
            Err(e) => {
                log::debug!("Case {} failed to run: {e:#}", case.index);
                false
            }
        };

        // One byte past the expected length is enough to tell a mismatch
        let head_limit = (case.expected.len() + 1).max(OUTPUT_LIMIT);
        let output = read_head(&output_path, head_limit).unwrap_or_else(|e| {
            // Absent when the program never started
            log::debug!("No output captured for case {}: {e}", case.index);
            Vec::new()
        });
        let memory_delta_kb = memory::delta_kb(before, after);
        let outcome = classify(
            exited_ok,
            memory_delta_kb,
            memory_limit_kb,
            &output,
            case.expected.as_bytes(),
        );

        let mut text = String::from_utf8_lossy(&output).into_owned();
        if let Err(e) = &status {
            text = format!("{e:#}");
        }

        Ok(CaseReport {
            outcome,
            elapsed,
            memory_delta_kb,
            output: truncate_output(text),
        })
    }
}

/// Decides a test outcome from what was observed.
///
/// A failed exit wins over the memory check, which wins over the output
/// comparison. A negative memory delta never exceeds the limit. Output is
/// compared byte for byte.
pub fn classify(
    exited_ok: bool,
    memory_delta_kb: i64,
    memory_limit_kb: u32,
    output: &[u8],
    expected: &[u8],
) -> TestOutcome {
    if !exited_ok {
        TestOutcome::RuntimeError
    } else if memory_delta_kb > i64::from(memory_limit_kb) {
        TestOutcome::MemoryLimitExceeded
    } else if output != expected {
        TestOutcome::WrongAnswer
    } else {
        TestOutcome::Pass
    }
}

/// Starts the artifact with `input` on stdin and stdout+stderr in `output_path`
async fn execute_program(
    artifact: &Artifact,
    input: &str,
    output_path: &Path,
) -> Result<std::process::ExitStatus> {
    let Some((program, args)) = artifact.command.split_first() else {
        bail!("Empty run command");
    };

    let output_file = fs::File::create(output_path)
        .with_context(|| format!("failed to create {}", output_path.display()))?;

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::from(output_file.try_clone()?))
        .stderr(Stdio::from(output_file))
        .current_dir(&artifact.dir)
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;
    let _group = ProcessGroup::of(&child);

    if let Some(stdin) = child.stdin.take() {
        let mut stdin = tokio::io::BufWriter::new(stdin);
        let written = match stdin.write_all(input.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        // The program may exit without consuming its input
        if let Err(e) = written
            && e.kind() != ErrorKind::BrokenPipe
        {
            return Err(e.into());
        }
    }

    Ok(child.wait().await?)
}
