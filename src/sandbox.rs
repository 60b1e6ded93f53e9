mod compile;
mod executor;
mod memory;
mod process;
mod resolver;

pub use compile::{Toolchain, Toolchains, compile};
pub use executor::{ProcessRunner, classify};
pub use resolver::{Resolution, resolve};

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

/// Upper bound on captured output carried back in a verdict
pub const OUTPUT_LIMIT: usize = 4096;

/// A compiled program ready to be started once per test case
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Working directory owned by exactly one judging job
    pub dir: PathBuf,
    /// Fully substituted argv
    pub command: Vec<String>,
}

/// Result of running the toolchain over a submission
#[derive(Debug)]
pub enum Compilation {
    Success(Artifact),
    /// The toolchain rejected the source or could not be started
    Failure { diagnostics: String },
}

/// One test case as seen by the executor
#[derive(Debug, Clone)]
pub struct CaseInput {
    pub index: usize,
    pub input: String,
    pub expected: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestOutcome {
    Pass,
    WrongAnswer,
    RuntimeError,
    MemoryLimitExceeded,
}

/// Outcome of one test case plus what was measured while it ran
#[derive(Debug, Clone)]
pub struct CaseReport {
    pub outcome: TestOutcome,
    pub elapsed: Duration,
    /// Worker resident-set growth across the run; may be negative
    pub memory_delta_kb: i64,
    pub output: String,
}

/// Runs one artifact against one test case.
///
/// Implementations classify judged outcomes into [`TestOutcome`] and only
/// return `Err` for faults of the worker itself.
#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run(
        &self,
        artifact: &Artifact,
        case: &CaseInput,
        memory_limit_kb: u32,
    ) -> anyhow::Result<CaseReport>;
}

/// Cuts `text` to at most [`OUTPUT_LIMIT`] bytes on a char boundary
pub fn truncate_output(mut text: String) -> String {
    if text.len() > OUTPUT_LIMIT {
        let mut end = OUTPUT_LIMIT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
