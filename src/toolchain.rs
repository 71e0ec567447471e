//! Adapter around the compiled-language pipeline's external tools:
//! compiler, class analyzer, and test generator/runner.
//!
//! Every tool is spawned as a plain argument vector (placeholders are
//! substituted per argv element, untrusted content never goes through a
//! shell) with the identity's unit directory as working directory, a
//! wall-clock timeout, and kill-on-drop so no child outlives its case.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::time::timeout;

use crate::config::ToolchainConfig;
use crate::error::{HarnessError, Stage};
use crate::introspect;
use crate::surface::CallableSurface;

#[derive(Debug)]
pub struct Toolchain {
    config: ToolchainConfig,
}

impl Toolchain {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    /// Compiles the uploaded source. A compiler rejection is a
    /// user-visible compile error carrying the tool's output, and the
    /// pipeline stops there.
    pub async fn compile(&self, work_dir: &Path, source_file: &str) -> Result<(), HarnessError> {
        let argv = substitute(&self.config.compile, &[("%INPUT%", source_file)]);
        let output = self
            .invoke(argv, work_dir, self.config.compile_timeout_ms, Stage::Compile)
            .await?;

        if !output.status.success() {
            return Err(HarnessError::compile(tool_output(&output)));
        }
        Ok(())
    }

    /// Runs the analyzer over a compiled unit and parses its structured
    /// output into a surface.
    pub async fn analyze(
        &self,
        work_dir: &Path,
        unit: &str,
    ) -> Result<CallableSurface, HarnessError> {
        let argv = substitute(&self.config.analyze, &[("%UNIT%", unit)]);
        let output = self
            .invoke(argv, work_dir, self.config.run_timeout_ms, Stage::Analyze)
            .await?;

        if !output.status.success() {
            return Err(HarnessError::analyze(tool_output(&output)));
        }
        introspect::surface_from_analysis(&String::from_utf8_lossy(&output.stdout))
    }

    /// Generates and executes one test case via the external runner,
    /// returning its stdout verbatim (trimmed) as the actual-value
    /// payload. Test and suite names are synthesized from the method
    /// name; the runner owns everything past argument marshaling.
    pub async fn run_case(
        &self,
        work_dir: &Path,
        unit: &str,
        method: &str,
        expected: &str,
        args: &[serde_json::Value],
    ) -> Result<String, HarnessError> {
        let joined = join_args(args)?;
        let test_name = format!("Test{method}");
        let suite_name = format!("{method}Tests");
        let argv = substitute(
            &self.config.run,
            &[
                ("%UNIT%", unit),
                ("%TEST%", &test_name),
                ("%EXPECTED%", expected),
                ("%METHOD%", method),
                ("%ARGS%", &joined),
                ("%SUITE%", &suite_name),
            ],
        );
        let output = self
            .invoke(argv, work_dir, self.config.run_timeout_ms, Stage::Invoke)
            .await?;

        if !output.status.success() {
            return Err(HarnessError::invoke(tool_output(&output)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn invoke(
        &self,
        argv: Vec<String>,
        work_dir: &Path,
        timeout_ms: u64,
        stage: Stage,
    ) -> Result<std::process::Output, HarnessError> {
        let Some((program, rest)) = argv.split_first() else {
            return Err(HarnessError::new(stage, "empty tool command"));
        };
        log::debug!("invoking {stage} tool: {argv:?} in {}", work_dir.display());

        let mut command = tokio::process::Command::new(program);
        command
            .args(rest)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = timeout(Duration::from_millis(timeout_ms), command.output()).await;
        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(HarnessError::new(
                stage,
                format!("failed to spawn {program}: {e}"),
            )),
            // Dropping the output future kills the child
            Err(_) => Err(HarnessError::new(stage, "timeout")),
        }
    }
}

fn substitute(template: &[String], mapping: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|element| {
            let mut out = element.clone();
            for (placeholder, value) in mapping {
                out = out.replace(placeholder, value);
            }
            out
        })
        .collect()
}

/// Flattens a JSON argument list into the runner's comma-joined wire
/// form.
///
/// The delimiter cannot be escaped in that format, so an argument whose
/// rendering contains a comma, or one with no flat rendering at all,
/// is rejected up front rather than silently corrupting the argument
/// vector.
pub fn join_args(args: &[serde_json::Value]) -> Result<String, HarnessError> {
    use serde_json::Value as Json;

    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        let rendered = match arg {
            Json::Number(n) => n.to_string(),
            Json::String(s) => s.clone(),
            Json::Bool(b) => b.to_string(),
            Json::Null | Json::Array(_) | Json::Object(_) => {
                return Err(HarnessError::dispatch(format!(
                    "argument {arg} has no flat runner encoding"
                )));
            }
        };
        if rendered.contains(',') {
            return Err(HarnessError::dispatch(format!(
                "argument {rendered:?} contains the `,` delimiter"
            )));
        }
        parts.push(rendered);
    }
    Ok(parts.join(","))
}

fn tool_output(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
