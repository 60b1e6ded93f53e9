use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Raised when an integer on the wire does not name a known variant
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} code {code}")]
pub struct UnknownCode {
    kind: &'static str,
    code: i32,
}

/// Final classification of a judged submission.
///
/// The discriminants are the stable codes used on the wire and in the
/// `judgements` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Verdict {
    Accepted = 0,
    WrongAnswer = 1,
    CompileError = 2,
    TimeLimitExceeded = 3,
    RuntimeError = 4,
    MemoryLimitExceeded = 5,
    SystemError = 6,
}

impl Verdict {
    pub const ALL: [Verdict; 7] = [
        Verdict::Accepted,
        Verdict::WrongAnswer,
        Verdict::CompileError,
        Verdict::TimeLimitExceeded,
        Verdict::RuntimeError,
        Verdict::MemoryLimitExceeded,
        Verdict::SystemError,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accepted => "Accepted",
            Verdict::WrongAnswer => "Wrong Answer",
            Verdict::CompileError => "Compilation Error",
            Verdict::TimeLimitExceeded => "Time Limit Exceeded",
            Verdict::RuntimeError => "Runtime Error",
            Verdict::MemoryLimitExceeded => "Memory Limit Exceeded",
            Verdict::SystemError => "System Error",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Verdict> for i32 {
    fn from(verdict: Verdict) -> Self {
        verdict.code()
    }
}

impl TryFrom<i32> for Verdict {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Verdict::ALL
            .into_iter()
            .find(|v| v.code() == code)
            .ok_or(UnknownCode {
                kind: "verdict",
                code,
            })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported language: {0}")]
pub struct UnsupportedLanguage(pub String);

/// The closed set of languages a judging worker accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Language {
    Go = 0,
    Java = 1,
    Cpp = 2,
    Python = 3,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Go,
        Language::Java,
        Language::Cpp,
        Language::Python,
    ];

    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Language::Go => "Go",
            Language::Java => "Java",
            Language::Cpp => "C++",
            Language::Python => "Python",
        })
    }
}

impl FromStr for Language {
    type Err = UnsupportedLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "go" | "golang" => Ok(Language::Go),
            "java" => Ok(Language::Java),
            "c++" | "cpp" => Ok(Language::Cpp),
            "python" | "python3" => Ok(Language::Python),
            _ => Err(UnsupportedLanguage(s.to_string())),
        }
    }
}

impl From<Language> for i32 {
    fn from(language: Language) -> Self {
        language.code()
    }
}

impl TryFrom<i32> for Language {
    type Error = UnknownCode;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        Language::ALL
            .into_iter()
            .find(|l| l.code() == code)
            .ok_or(UnknownCode {
                kind: "language",
                code,
            })
    }
}

/// A submission as handed to the store; the store assigns its id
#[derive(Debug, Clone)]
pub struct Submission {
    pub user_id: i64,
    pub problem_id: i64,
    pub language: Language,
    pub source_code: String,
    pub submitted_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TestCase {
    pub test_id: i64,
    pub problem_id: i64,
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub time_limit_ms: u32,
    pub memory_limit_kb: u32,
}

/// Result of judging one submission; the store assigns its id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub user_id: i64,
    pub submission_id: i64,
    pub problem_id: i64,
    pub verdict: Verdict,
    pub runtime_ms: u32,
    pub memory_kb: u32,
    pub output: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_codes_are_stable() {
        let codes: Vec<i32> = Verdict::ALL.iter().map(|v| v.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(serde_json::to_string(&Verdict::WrongAnswer).unwrap(), "1");
        assert_eq!(
            serde_json::from_str::<Verdict>("5").unwrap(),
            Verdict::MemoryLimitExceeded
        );
        assert!(serde_json::from_str::<Verdict>("7").is_err());
    }

    #[test]
    fn test_language_names() {
        assert_eq!("C++".parse::<Language>().unwrap(), Language::Cpp);
        assert_eq!("golang".parse::<Language>().unwrap(), Language::Go);
        assert_eq!(" Python ".parse::<Language>().unwrap(), Language::Python);
        let err = "Rust".parse::<Language>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported language: Rust");
    }

    #[test]
    fn test_language_wire_codes() {
        assert_eq!(serde_json::to_string(&Language::Java).unwrap(), "1");
        assert_eq!(serde_json::from_str::<Language>("3").unwrap(), Language::Python);
        assert!(serde_json::from_str::<Language>("4").is_err());
    }
}
