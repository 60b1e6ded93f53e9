use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "oj-pipeline", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Run the service registry that judging workers announce themselves to
    Registry,
    /// Run a judging worker
    Worker,
    /// Run the submission coordinator
    Coordinator {
        /// Whether to flush the existing database
        #[arg(long = "flush-data", short = 'f', default_value_t = false)]
        flush_data: bool,
    },
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub worker: WorkerConfig,
    pub coordinator: CoordinatorConfig,
    pub languages: Vec<LanguageConfig>,
    pub problems: Vec<ProblemConfig>,
    pub users: Vec<UserConfig>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    /// Where clients reach the registry, `host:port`
    pub address: String,
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    /// Lease length of a registered instance
    pub ttl_secs: u64,
    /// How often a worker renews its lease
    pub heartbeat_secs: u64,
    /// Upper bound on one call to the registry
    pub request_timeout_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2379".to_string(),
            bind_address: None,
            bind_port: None,
            ttl_secs: 15,
            heartbeat_secs: 5,
            request_timeout_secs: 5,
        }
    }
}

impl RegistryConfig {
    pub fn bind(&self) -> (String, u16) {
        (
            self.bind_address.clone().unwrap_or("127.0.0.1".to_string()),
            self.bind_port.unwrap_or(2379),
        )
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    /// Address published to the registry; defaults to the bind address
    pub advertise_address: Option<String>,
    pub service_name: String,
    /// Parent of the per-job working directories
    pub work_root: Option<PathBuf>,
    pub compile_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            bind_port: None,
            advertise_address: None,
            service_name: crate::registry::JUDGE_SERVICE.to_string(),
            work_root: None,
            compile_timeout_secs: 30,
        }
    }
}

impl WorkerConfig {
    pub fn bind(&self) -> (String, u16) {
        (
            self.bind_address.clone().unwrap_or("127.0.0.1".to_string()),
            self.bind_port.unwrap_or(8081),
        )
    }

    pub fn advertise(&self) -> String {
        self.advertise_address.clone().unwrap_or_else(|| {
            let (address, port) = self.bind();
            format!("{address}:{port}")
        })
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
    /// SQLite database file; defaults to the user data directory
    pub database: Option<PathBuf>,
    pub dispatch_attempts: usize,
    pub rpc_timeout_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            bind_port: None,
            database: None,
            dispatch_attempts: 3,
            rpc_timeout_secs: 120,
        }
    }
}

impl CoordinatorConfig {
    pub fn bind(&self) -> (String, u16) {
        (
            self.bind_address.clone().unwrap_or("127.0.0.1".to_string()),
            self.bind_port.unwrap_or(12345),
        )
    }
}

/// Toolchain override for one language.
///
/// Commands are argv templates; `%INPUT%` is replaced by the source path,
/// `%OUTPUT%` by the executable path and `%DIR%` by the job directory.
#[derive(Deserialize, Debug, Clone)]
pub struct LanguageConfig {
    pub language: String,
    pub file_name: String,
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ProblemConfig {
    pub id: i64,
    pub name: String,
    pub time_limit: MilliSecond,
    pub memory_limit: KiloByte,
    pub cases: Vec<CaseConfig>,
}

/// A test case given either inline or as a pair of files
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct CaseConfig {
    pub input: Option<String>,
    pub input_file: Option<String>,
    pub expected: Option<String>,
    pub answer_file: Option<String>,
}

impl CaseConfig {
    /// Returns `(input, expected_output)`, reading files where needed
    pub fn load(&self) -> std::io::Result<(String, String)> {
        let input = match (&self.input, &self.input_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => fs::read_to_string(path)?,
            (None, None) => String::new(),
        };
        let expected = match (&self.expected, &self.answer_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => fs::read_to_string(path)?,
            (None, None) => String::new(),
        };
        Ok((input, expected))
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct UserConfig {
    pub id: i64,
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u32);

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KiloByte(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let file = std::fs::File::open("data/example.json").unwrap();
        let reader = std::io::BufReader::new(file);
        let config: Config = serde_json::from_reader(reader).unwrap();
        assert_eq!(config.worker.bind(), ("127.0.0.1".to_string(), 8081));
        assert_eq!(config.problems[0].time_limit, MilliSecond(2000));
        assert_eq!(config.problems[0].memory_limit, KiloByte(65536));
        assert_eq!(config.problems[0].cases.len(), 2);
        assert_eq!(config.languages[0].language, "cpp");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.registry.address, "127.0.0.1:2379");
        assert_eq!(config.registry.request_timeout_secs, 5);
        assert_eq!(config.worker.service_name, "judge-worker");
        assert_eq!(config.worker.advertise(), "127.0.0.1:8081");
        assert_eq!(config.coordinator.dispatch_attempts, 3);
        assert!(config.problems.is_empty());
    }

    #[test]
    fn test_case_config_prefers_inline_text() {
        let case = CaseConfig {
            input: Some("3\n".to_string()),
            input_file: Some("does/not/exist".to_string()),
            expected: Some("3\n".to_string()),
            answer_file: None,
        };
        assert_eq!(case.load().unwrap(), ("3\n".to_string(), "3\n".to_string()));

        let missing = CaseConfig {
            input_file: Some("does/not/exist".to_string()),
            ..Default::default()
        };
        assert!(missing.load().is_err());
    }
}
