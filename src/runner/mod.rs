#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Executes extracted snippets in a disposable scratch directory.
//!
//! Every call to [`Runner::run`] gets its own uniquely named directory, which
//! is removed on every exit path, so concurrent grading calls never share
//! files. Failures of any kind are reported inside [`ExecutionResult`].

/// Interpreters and compilers.
pub mod toolchain;

use std::{
    ffi::OsString,
    path::{Component, Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use bon::Builder;
use serde::{Deserialize, Serialize};
pub use toolchain::{Layout, Stage, Step, Toolchain};

use crate::{
    config,
    constants::{MAIN_RENAME, REASON_TRUNCATE},
    extract::sanitize_ascii,
    process::{self, ProcessError, StdinSource},
    util::truncate,
};

/// Text spliced around the snippet before it is written to disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
#[serde(default)]
pub struct Harness {
    /// Written before the snippet.
    pub prelude:      Option<String>,
    /// Written after the snippet, typically the call under test.
    pub epilogue:     Option<String>,
    /// Rename the snippet's `int main` when the harness brings its own.
    #[builder(default)]
    pub replace_main: bool,
}

impl Harness {
    /// Harness that appends `epilogue` to the snippet.
    pub fn append(epilogue: impl Into<String>) -> Self {
        Self {
            epilogue: Some(epilogue.into()),
            ..Self::default()
        }
    }

    /// Combines the harness with `snippet`.
    pub fn apply(&self, snippet: &str) -> String {
        let mut body = snippet.to_string();
        let brings_main = [&self.prelude, &self.epilogue]
            .into_iter()
            .flatten()
            .any(|text| text.contains("int main"));
        if self.replace_main && brings_main {
            body = body.replace("int main", MAIN_RENAME);
        }

        [self.prelude.as_deref(), Some(body.as_str()), self.epilogue.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A file written into the scratch directory before anything runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fixture {
    /// Path relative to the scratch directory.
    pub path:     String,
    /// File contents.
    pub contents: String,
}

impl Fixture {
    /// Creates a fixture.
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path:     path.into(),
            contents: contents.into(),
        }
    }
}

/// Rewrites a fixed path the snippet refers to into a fixture's scratch path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    /// Literal path as written in the snippet, e.g. `/tmp/file.txt`.
    pub from:    String,
    /// Fixture path (relative to the scratch directory) to point at instead.
    pub fixture: String,
}

impl Redirect {
    /// Creates a redirect.
    pub fn new(from: impl Into<String>, fixture: impl Into<String>) -> Self {
        Self {
            from:    from.into(),
            fixture: fixture.into(),
        }
    }
}

/// Everything observed while executing one snippet.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Last stage that was attempted.
    pub stage:     Stage,
    /// Exit code of the last process, if it exited normally.
    pub exit_code: Option<i32>,
    /// Standard output of the last process.
    pub stdout:    String,
    /// Standard error of every process, in order.
    pub stderr:    String,
    /// Whether the last process was killed for exceeding its time limit.
    pub timed_out: bool,
    /// Failure that happened outside the process itself.
    pub error:     Option<String>,
    /// Wall-clock time spent, including setup.
    pub elapsed:   Duration,
}

impl ExecutionResult {
    /// A result for a failure that prevented a process from running.
    fn errored(stage: Stage, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            stage,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            error: Some(error.into()),
            elapsed,
        }
    }

    /// True when every step ran to completion with a zero exit code.
    pub fn success(&self) -> bool {
        !self.timed_out && self.error.is_none() && self.exit_code == Some(0)
    }

    /// Stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// One-paragraph description of why the execution did not succeed.
    pub fn failure_summary(&self) -> String {
        if let Some(error) = &self.error {
            return format!("{} stage failed: {}", self.stage, truncate(error, REASON_TRUNCATE));
        }
        if self.success() {
            return format!("{} stage succeeded", self.stage);
        }

        let status = match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "a signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("{} stage terminated with {status}", self.stage)
        } else {
            format!(
                "{} stage terminated with {status}: {}",
                self.stage,
                truncate(stderr, REASON_TRUNCATE)
            )
        }
    }
}

/// Runs snippets with one toolchain and one harness.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct Runner {
    /// Interpreter or compiler to use.
    toolchain:       Toolchain,
    /// Text spliced around the snippet.
    #[builder(default)]
    harness:         Harness,
    /// Files written before running.
    #[builder(default, with = |items: impl IntoIterator<Item = Fixture>| items.into_iter().collect())]
    fixtures:        Vec<Fixture>,
    /// Fixed paths rewritten into fixture paths.
    #[builder(default, with = |items: impl IntoIterator<Item = Redirect>| items.into_iter().collect())]
    redirects:       Vec<Redirect>,
    /// Extra arguments for the run step; `{scratch}` expands to the directory.
    #[builder(default, with = |items: impl IntoIterator<Item = impl Into<String>>| {
        items.into_iter().map(Into::into).collect()
    })]
    args:            Vec<String>,
    /// Bytes fed to the run step's stdin.
    stdin:           Option<String>,
    /// Command run after the snippet to report what it left behind; its
    /// stdout becomes the graded output.
    inspect:         Option<Vec<String>>,
    /// Overrides the toolchain's ASCII-only default.
    ascii_only:      Option<bool>,
    /// Limit for the compile step.
    #[builder(default = config::compile_timeout())]
    compile_timeout: Duration,
    /// Limit for every other step.
    #[builder(default = config::run_timeout())]
    run_timeout:     Duration,
    /// Parent directory for scratch directories.
    scratch_root:    Option<PathBuf>,
}

impl Runner {
    /// Executes `snippet`. Never fails; see [`ExecutionResult`].
    pub async fn run(&self, snippet: &str) -> ExecutionResult {
        let started = Instant::now();
        match self.try_run(snippet, started).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!("runner setup failed: {err:#}");
                ExecutionResult::errored(Stage::Setup, format!("{err:#}"), started.elapsed())
            }
        }
    }

    /// Creates the scratch directory, runs every step and cleans up.
    async fn try_run(&self, snippet: &str, started: Instant) -> Result<ExecutionResult> {
        let root = self.scratch_root.clone().unwrap_or_else(config::scratch_root);
        let scratch = tempfile::Builder::new()
            .prefix("verdict-")
            .tempdir_in(&root)
            .with_context(|| format!("Could not create scratch directory in {}", root.display()))?;
        let layout = Layout::new(scratch.path(), &self.toolchain);

        let result = match self.prepare(snippet, &layout) {
            Ok(steps) => self.execute_steps(&steps, &layout, started).await,
            Err(err) => ExecutionResult::errored(Stage::Setup, format!("{err:#}"), started.elapsed()),
        };

        let path = scratch.path().to_path_buf();
        if let Err(err) = scratch.close() {
            tracing::warn!("could not remove scratch directory {}: {err}", path.display());
        }

        Ok(result)
    }

    /// Writes fixtures and the source file, and plans the steps.
    fn prepare(&self, snippet: &str, layout: &Layout) -> Result<Vec<Step>> {
        for fixture in &self.fixtures {
            let path = fixture_path(layout, &fixture.path)?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Could not create {}", parent.display()))?;
            }
            std::fs::write(&path, &fixture.contents)
                .with_context(|| format!("Could not write fixture {}", path.display()))?;
        }

        let source = self.source_text(snippet, layout)?;
        std::fs::write(&layout.source, source)
            .with_context(|| format!("Could not write {}", layout.source.display()))?;

        let mut steps = self.toolchain.plan(layout)?;
        if let Some(cmd) = &self.inspect {
            steps.push(Step::command(Stage::Inspect, cmd, layout)?);
        }
        Ok(steps)
    }

    /// Final source text: redirects, harness, then ASCII sanitizing.
    fn source_text(&self, snippet: &str, layout: &Layout) -> Result<String> {
        let mut code = snippet.to_string();
        for redirect in &self.redirects {
            let target = fixture_path(layout, &redirect.fixture)?;
            code = code.replace(&redirect.from, &target.display().to_string());
        }

        let code = self.harness.apply(&code);
        if self.ascii_only.unwrap_or_else(|| self.toolchain.wants_ascii()) {
            Ok(sanitize_ascii(&code))
        } else {
            Ok(code)
        }
    }

    /// Runs each step in order, stopping at the first failure.
    async fn execute_steps(
        &self,
        steps: &[Step],
        layout: &Layout,
        started: Instant,
    ) -> ExecutionResult {
        let mut stderr_log: Vec<String> = Vec::new();
        let mut last = ExecutionResult::errored(Stage::Setup, "no steps to run", started.elapsed());

        for step in steps {
            let program = match step.resolve() {
                Ok(program) => program,
                Err(err) => {
                    return ExecutionResult::errored(step.stage, format!("{err:#}"), started.elapsed());
                }
            };

            let mut args = step.args.clone();
            let mut stdin = StdinSource::Null;
            if step.user_facing {
                args.extend(self.args.iter().map(|a| OsString::from(layout.expand(a))));
                if let Some(input) = &self.stdin {
                    stdin = StdinSource::Bytes(input.clone().into_bytes());
                }
            }
            let limit = match step.stage {
                Stage::Compile => self.compile_timeout,
                _ => self.run_timeout,
            };

            tracing::debug!(stage = %step.stage, command = %step.display(), "running step");
            let outcome =
                process::run_collect(&program, &args, stdin, Some(&layout.scratch), &[], Some(limit))
                    .await;

            match outcome {
                Ok(collected) => {
                    let stderr = collected.stderr_text();
                    if !stderr.trim().is_empty() {
                        stderr_log.push(stderr);
                    }
                    last = ExecutionResult {
                        stage:     step.stage,
                        exit_code: collected.status.code(),
                        stdout:    collected.stdout_text(),
                        stderr:    stderr_log.join("\n"),
                        timed_out: false,
                        error:     None,
                        elapsed:   started.elapsed(),
                    };
                    if !collected.status.success() && !step.tolerant {
                        tracing::debug!(stage = %step.stage, "step failed: {:?}", last.exit_code);
                        return last;
                    }
                }
                Err(ProcessError::TimedOut(limit)) => {
                    tracing::warn!(stage = %step.stage, "step timed out after {limit:?}");
                    return ExecutionResult {
                        stage:     step.stage,
                        exit_code: None,
                        stdout:    String::new(),
                        stderr:    stderr_log.join("\n"),
                        timed_out: true,
                        error:     Some(format!("timed out after {limit:?}")),
                        elapsed:   started.elapsed(),
                    };
                }
                Err(err) => {
                    return ExecutionResult::errored(step.stage, err.to_string(), started.elapsed());
                }
            }
        }

        last
    }
}

/// Resolves a fixture path inside the scratch directory.
fn fixture_path(layout: &Layout, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.is_empty() || escapes {
        bail!("Fixture path `{relative}` must be relative to the scratch directory");
    }
    Ok(layout.scratch.join(rel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harness_appends_with_blank_line() {
        let harness = Harness::append("print(f(2))");
        assert_eq!(harness.apply("def f(x):\n    return x"), "def f(x):\n    return x\n\nprint(f(2))");
    }

    #[test]
    fn harness_renames_candidate_main_only_when_it_brings_one() {
        let harness = Harness::builder()
            .epilogue("int main() { return run(); }".to_string())
            .replace_main(true)
            .build();
        let out = harness.apply("int main() { return 1; }");
        assert!(out.starts_with("int __delete_this__main() { return 1; }"));
        assert!(out.ends_with("int main() { return run(); }"));

        let plain = Harness::builder().replace_main(true).build();
        assert_eq!(plain.apply("int main() {}"), "int main() {}");
    }

    #[test]
    fn fixture_paths_cannot_escape() {
        let layout = Layout::new(Path::new("/scratch/x"), &Toolchain::Python);
        assert!(fixture_path(&layout, "data/file.txt").is_ok());
        assert!(fixture_path(&layout, "../file.txt").is_err());
        assert!(fixture_path(&layout, "/etc/passwd").is_err());
        assert!(fixture_path(&layout, "").is_err());
    }

    #[test]
    fn source_text_redirects_then_sanitizes() {
        let runner = Runner::builder()
            .toolchain(Toolchain::C)
            .redirects([Redirect::new("/tmp/file.txt", "file.txt")])
            .build();
        let layout = Layout::new(Path::new("/scratch/x"), &Toolchain::C);
        let text = runner
            .source_text("fopen(\"/tmp/file.txt\", \u{201c}r\u{201d});", &layout)
            .expect("source");
        assert_eq!(text, "fopen(\"/scratch/x/file.txt\", \"r\");");
    }

    #[test]
    fn failure_summary_mentions_stage_and_stderr() {
        let result = ExecutionResult {
            stage:     Stage::Compile,
            exit_code: Some(1),
            stdout:    String::new(),
            stderr:    "main.c:1: error: expected ';'".into(),
            timed_out: false,
            error:     None,
            elapsed:   Duration::from_millis(5),
        };
        assert!(!result.success());
        assert_eq!(
            result.failure_summary(),
            "compile stage terminated with exit status 1: main.c:1: error: expected ';'"
        );
    }
}
