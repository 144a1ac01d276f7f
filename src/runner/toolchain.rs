#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! External interpreters and compilers the runner knows how to drive.

use std::{
    ffi::OsString,
    fmt::Display,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use which::which;

/// Pipeline stage a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Preparing the scratch directory and source file.
    Setup,
    /// Compiling the snippet.
    Compile,
    /// Running the snippet.
    Run,
    /// Querying state the run left behind.
    Inspect,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Setup => write!(f, "setup"),
            Stage::Compile => write!(f, "compile"),
            Stage::Run => write!(f, "run"),
            Stage::Inspect => write!(f, "inspect"),
        }
    }
}

/// Where a toolchain's files live inside one scratch directory.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Root of the scratch directory.
    pub scratch: PathBuf,
    /// Path the snippet is written to.
    pub source:  PathBuf,
    /// Path compiled output goes to.
    pub binary:  PathBuf,
}

impl Layout {
    /// Builds the layout for `toolchain` inside `scratch`.
    pub fn new(scratch: &Path, toolchain: &Toolchain) -> Self {
        let binary_name = if cfg!(windows) { "main.exe" } else { "main" };
        Self {
            scratch: scratch.to_path_buf(),
            source:  scratch.join(toolchain.source_name()),
            binary:  scratch.join(binary_name),
        }
    }

    /// Substitutes `{source}`, `{binary}` and `{scratch}` placeholders.
    pub fn expand(&self, arg: &str) -> String {
        arg.replace("{source}", &self.source.display().to_string())
            .replace("{binary}", &self.binary.display().to_string())
            .replace("{scratch}", &self.scratch.display().to_string())
    }
}

/// One command the runner executes.
#[derive(Debug, Clone)]
pub struct Step {
    /// Stage this command belongs to.
    pub stage:       Stage,
    /// Program names to try on `PATH`, in order, or a path to an executable.
    pub candidates:  Vec<String>,
    /// Arguments passed to the program.
    pub args:        Vec<OsString>,
    /// Whether the caller-supplied stdin and arguments apply to this step.
    pub user_facing: bool,
    /// Keep going when this step exits non-zero.
    pub tolerant:    bool,
}

impl Step {
    /// Creates a step that runs one of `candidates`.
    fn new(stage: Stage, candidates: &[&str], args: Vec<OsString>) -> Self {
        Self {
            stage,
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            args,
            user_facing: stage == Stage::Run,
            tolerant: false,
        }
    }

    /// Marks the step as allowed to fail without stopping the pipeline.
    fn tolerant(mut self) -> Self {
        self.tolerant = true;
        self
    }

    /// Creates a step that executes a file produced by an earlier step.
    fn binary(path: &Path) -> Self {
        Self {
            stage:       Stage::Run,
            candidates:  vec![path.display().to_string()],
            args:        Vec::new(),
            user_facing: true,
            tolerant:    false,
        }
    }

    /// Builds a step from a command line, program first. Arguments may use
    /// the `{source}`, `{binary}` and `{scratch}` placeholders.
    pub fn command(stage: Stage, cmd: &[String], layout: &Layout) -> Result<Self> {
        let (program, args) = cmd
            .split_first()
            .with_context(|| format!("{stage} command is empty"))?;
        Ok(Self {
            stage,
            candidates: vec![layout.expand(program)],
            args: args.iter().map(|a| layout.expand(a).into()).collect(),
            user_facing: stage == Stage::Run,
            tolerant: false,
        })
    }

    /// Resolves the program to execute.
    pub fn resolve(&self) -> Result<OsString> {
        for candidate in &self.candidates {
            let path = Path::new(candidate);
            if path.is_absolute() {
                return Ok(path.as_os_str().to_os_string());
            }
            if let Ok(found) = which(candidate) {
                return Ok(found.into_os_string());
            }
        }
        bail!("Cannot find `{}` on PATH", self.candidates.join("` or `"))
    }

    /// Human readable command line for logs and reasons.
    pub fn display(&self) -> String {
        let program = self.candidates.first().cloned().unwrap_or_default();
        let args = self
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        if args.is_empty() {
            program
        } else {
            format!("{} {}", program, args.join(" "))
        }
    }
}

/// External toolchain used to execute a snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "language", rename_all = "snake_case")]
pub enum Toolchain {
    /// `python3 main.py`.
    Python,
    /// `bash main.sh`.
    Bash,
    /// `gcc -o main main.c -lm`, then `./main`.
    C,
    /// `g++ -o main main.cpp -lm`, then `./main`.
    Cpp,
    /// `rustc --edition 2021 -O -o main main.rs`, then `./main`.
    Rust,
    /// `node main.js`.
    Node,
    /// Loads `main.sql` into a fresh database, then runs `query` against it.
    Sqlite {
        /// Statement whose output is graded.
        query: String,
    },
    /// Anything else; arguments may use `{source}`, `{binary}` and
    /// `{scratch}` placeholders.
    Custom {
        /// File name the snippet is written to.
        source_name: String,
        /// Optional compile command, program first.
        #[serde(default)]
        compile:     Option<Vec<String>>,
        /// Run command, program first.
        run:         Vec<String>,
    },
}

impl Toolchain {
    /// File name the snippet is written to.
    pub fn source_name(&self) -> &str {
        match self {
            Toolchain::Python => "main.py",
            Toolchain::Bash => "main.sh",
            Toolchain::C => "main.c",
            Toolchain::Cpp => "main.cpp",
            Toolchain::Rust => "main.rs",
            Toolchain::Node => "main.js",
            Toolchain::Sqlite { .. } => "main.sql",
            Toolchain::Custom { source_name, .. } => source_name,
        }
    }

    /// Whether non-ASCII characters should be stripped before writing source.
    pub fn wants_ascii(&self) -> bool {
        matches!(self, Toolchain::Bash | Toolchain::C | Toolchain::Cpp)
    }

    /// Short name for logs.
    pub fn name(&self) -> &str {
        match self {
            Toolchain::Python => "python",
            Toolchain::Bash => "bash",
            Toolchain::C => "c",
            Toolchain::Cpp => "cpp",
            Toolchain::Rust => "rust",
            Toolchain::Node => "node",
            Toolchain::Sqlite { .. } => "sqlite",
            Toolchain::Custom { .. } => "custom",
        }
    }

    /// Programs this toolchain needs on `PATH`, as alternatives groups.
    pub fn required_programs(&self) -> Vec<Vec<String>> {
        let group = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        match self {
            Toolchain::Python => vec![group(&["python3", "python"])],
            Toolchain::Bash => vec![group(&["bash"])],
            Toolchain::C => vec![group(&["gcc"])],
            Toolchain::Cpp => vec![group(&["g++"])],
            Toolchain::Rust => vec![group(&["rustc"])],
            Toolchain::Node => vec![group(&["node"])],
            Toolchain::Sqlite { .. } => vec![group(&["sqlite3"])],
            Toolchain::Custom { compile, run, .. } => compile
                .iter()
                .chain(std::iter::once(run))
                .filter_map(|cmd| cmd.first().cloned())
                .map(|program| vec![program])
                .collect(),
        }
    }

    /// Ordered commands needed to execute the snippet described by `layout`.
    pub fn plan(&self, layout: &Layout) -> Result<Vec<Step>> {
        let source: OsString = layout.source.clone().into_os_string();
        let binary: OsString = layout.binary.clone().into_os_string();

        let steps = match self {
            Toolchain::Python => vec![Step::new(Stage::Run, &["python3", "python"], vec![source])],
            Toolchain::Bash => vec![Step::new(Stage::Run, &["bash"], vec![source])],
            Toolchain::Node => vec![Step::new(Stage::Run, &["node"], vec![source])],
            Toolchain::C => vec![
                Step::new(Stage::Compile, &["gcc"], vec![
                    "-o".into(),
                    binary,
                    source,
                    "-lm".into(),
                ]),
                Step::binary(&layout.binary),
            ],
            Toolchain::Cpp => vec![
                Step::new(Stage::Compile, &["g++"], vec![
                    "-o".into(),
                    binary,
                    source,
                    "-lm".into(),
                ]),
                Step::binary(&layout.binary),
            ],
            Toolchain::Rust => vec![
                Step::new(Stage::Compile, &["rustc"], vec![
                    "--edition".into(),
                    "2021".into(),
                    "-O".into(),
                    "-o".into(),
                    binary,
                    source,
                ]),
                Step::binary(&layout.binary),
            ],
            Toolchain::Sqlite { query } => {
                let db: OsString = layout.scratch.join("db.sqlite").into_os_string();
                vec![
                    Step::new(Stage::Run, &["sqlite3"], vec![
                        "-init".into(),
                        source,
                        db.clone(),
                        ".exit".into(),
                    ])
                    .tolerant(),
                    Step::new(Stage::Inspect, &["sqlite3"], vec![db, query.into()]),
                ]
            }
            Toolchain::Custom { compile, run, .. } => {
                let mut steps = Vec::new();
                if let Some(cmd) = compile {
                    steps.push(Step::command(Stage::Compile, cmd, layout)?);
                }
                steps.push(Step::command(Stage::Run, run, layout)?);
                steps
            }
        };

        Ok(steps)
    }
}
