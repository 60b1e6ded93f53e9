use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tokio::time::timeout;

use crate::config::LanguageConfig;
use crate::model::Language;

use super::process::{ProcessGroup, read_head};
use super::{Artifact, Compilation, OUTPUT_LIMIT, truncate_output};

const EXECUTABLE_NAME: &str = "main";
const COMPILE_OUTPUT_NAME: &str = "compile_stdout.txt";

/// How one language turns source text into something runnable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub file_name: String,
    /// `None` for languages that run straight from source
    pub compile: Option<Vec<String>>,
    pub run: Vec<String>,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl Toolchain {
    pub fn builtin(language: Language) -> Self {
        match language {
            Language::Cpp => Self {
                file_name: "main.cpp".to_string(),
                compile: Some(argv(&[
                    "g++", "-O2", "-std=c++17", "-o", "%OUTPUT%", "%INPUT%",
                ])),
                run: argv(&["%OUTPUT%"]),
            },
            Language::Go => Self {
                file_name: "main.go".to_string(),
                compile: Some(argv(&["go", "build", "-o", "%OUTPUT%", "%INPUT%"])),
                run: argv(&["%OUTPUT%"]),
            },
            Language::Java => Self {
                file_name: "Main.java".to_string(),
                compile: Some(argv(&["javac", "-d", "%DIR%", "%INPUT%"])),
                run: argv(&["java", "-cp", "%DIR%", "Main"]),
            },
            Language::Python => Self {
                file_name: "main.py".to_string(),
                compile: Some(argv(&["python3", "-m", "py_compile", "%INPUT%"])),
                run: argv(&["python3", "%INPUT%"]),
            },
        }
    }
}

/// Toolchain per supported language; every [`Language`] always has one
#[derive(Debug, Clone)]
pub struct Toolchains {
    map: HashMap<Language, Toolchain>,
}

impl Default for Toolchains {
    fn default() -> Self {
        let map = Language::ALL
            .into_iter()
            .map(|l| (l, Toolchain::builtin(l)))
            .collect();
        Self { map }
    }
}

impl Toolchains {
    /// Built-in toolchains with the configured overrides applied
    pub fn from_config(configs: &[LanguageConfig]) -> Result<Self> {
        let mut toolchains = Self::default();
        for config in configs {
            let language: Language = config.language.parse()?;
            if config.run.is_empty() || config.compile.as_ref().is_some_and(|c| c.is_empty()) {
                return Err(anyhow!("empty command in toolchain for {language}"));
            }
            toolchains.map.insert(
                language,
                Toolchain {
                    file_name: config.file_name.clone(),
                    compile: config.compile.clone(),
                    run: config.run.clone(),
                },
            );
        }
        Ok(toolchains)
    }

    pub fn with(mut self, language: Language, toolchain: Toolchain) -> Self {
        self.map.insert(language, toolchain);
        self
    }

    pub fn get(&self, language: Language) -> &Toolchain {
        // Filled for every language by `default`
        &self.map[&language]
    }
}

/// Writes `source` into `workdir` and runs the language toolchain over it.
///
/// A toolchain that exits non-zero, cannot be started or overruns
/// `compile_timeout` yields [`Compilation::Failure`]. Only faults of the
/// worker itself (e.g. an unwritable directory) are returned as `Err`.
pub async fn compile(
    toolchain: &Toolchain,
    workdir: &Path,
    source: &str,
    compile_timeout: Duration,
) -> Result<Compilation> {
    let source_path = workdir.join(&toolchain.file_name);
    fs::write(&source_path, source)
        .with_context(|| format!("failed to write source to {}", source_path.display()))?;

    let executable_path = workdir.join(EXECUTABLE_NAME);
    let source_str = source_path.to_string_lossy();
    let executable_str = executable_path.to_string_lossy();
    let dir_str = workdir.to_string_lossy();

    let mut mapping = HashMap::<&str, &str>::new();
    mapping.insert("%INPUT%", &source_str);
    mapping.insert("%OUTPUT%", &executable_str);
    mapping.insert("%DIR%", &dir_str);

    let artifact = Artifact {
        dir: workdir.to_path_buf(),
        command: apply_template(&toolchain.run, &mapping),
    };

    let Some(compile_template) = &toolchain.compile else {
        return Ok(Compilation::Success(artifact));
    };
    let compile_command = apply_template(compile_template, &mapping);
    let program = compile_command.first().cloned().unwrap_or_default();
    let output_path = workdir.join(COMPILE_OUTPUT_NAME);

    let start_time = Instant::now();
    let status = timeout(
        compile_timeout,
        execute_compile_command(&compile_command, workdir, &output_path),
    )
    .await;
    let compile_time = start_time.elapsed();

    let diagnostics = read_head(&output_path, OUTPUT_LIMIT)
        .map(|head| String::from_utf8_lossy(&head).into_owned())
        .unwrap_or_default();
    if !diagnostics.is_empty() {
        log::debug!("{program} output:\n{diagnostics}");
    }

    let failure = match status {
        Ok(Ok(exit_status)) if exit_status.success() => None,
        Ok(Ok(exit_status)) => Some(format!("Compiler exited with {exit_status}")),
        Ok(Err(e)) => Some(format!("Failed to start {program}: {e}")),
        Err(_) => Some(format!(
            "Compilation timed out after {}s",
            compile_timeout.as_secs()
        )),
    };

    match failure {
        None => {
            log::info!(
                "Compiled {} in {}ms",
                source_path.display(),
                compile_time.as_millis()
            );
            Ok(Compilation::Success(artifact))
        }
        Some(reason) => {
            log::info!("Compilation of {} failed: {reason}", source_path.display());
            let diagnostics = if diagnostics.is_empty() {
                reason
            } else {
                diagnostics
            };
            Ok(Compilation::Failure {
                diagnostics: truncate_output(diagnostics),
            })
        }
    }
}

/// Runs the compiler with stdout and stderr both sent to `output_path`
async fn execute_compile_command(
    command: &[String],
    workdir: &Path,
    output_path: &Path,
) -> Result<std::process::ExitStatus> {
    let Some((program, args)) = command.split_first() else {
        anyhow::bail!("Empty compile command");
    };

    let output_file = fs::File::create(output_path)?;

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(output_file.try_clone()?))
        .stderr(Stdio::from(output_file))
        .current_dir(workdir)
        .process_group(0)
        .kill_on_drop(true)
        .spawn()?;
    let _group = ProcessGroup::of(&child);

    Ok(child.wait().await?)
}

/// Applies placeholder substitutions to every argument of a command template
fn apply_template(template: &[String], mapping: &HashMap<&str, &str>) -> Vec<String> {
    template
        .iter()
        .map(|s| {
            let mut t = s.clone();
            for (k, v) in mapping.iter() {
                t = t.replace(k, v);
            }
            t
        })
        .collect()
}
