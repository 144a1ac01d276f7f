#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # verdict
//!
//! Command-line front end for the grading functions: grade an answer against
//! a built-in assertion or a suite file, list built-ins, or check which
//! toolchains are installed.

use std::{
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use bpaf::*;
use colored::Colorize;
use dotenvy::dotenv;
use serde_json::Value;
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};
use verdict::{
    GradeContext, Suite, catalog, health,
    report::{GradedRow, render_json, render_table},
};

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade an answer
    Grade {
        /// File holding the answer; stdin when absent
        answer:  Option<PathBuf>,
        /// File holding harness context JSON
        context: Option<PathBuf>,
        /// Print JSON instead of a table
        json:    bool,
        /// Built-in assertion name or suite path
        target:  String,
    },
    /// List built-in assertions
    List,
    /// Check toolchains and judge settings
    Doctor,
}

/// Parsed command line.
#[derive(Debug, Clone)]
struct Opts {
    /// Log at debug level
    verbose: bool,
    /// Command to run
    cmd:     Cmd,
}

/// Parse the command line arguments
fn options() -> OptionParser<Opts> {
    let verbose = short('v')
        .long("verbose")
        .help("Log debug output to stderr")
        .switch();

    let answer = long("answer")
        .help("File holding the candidate answer (default: stdin)")
        .argument::<PathBuf>("FILE")
        .optional();
    let context = long("context")
        .help("JSON file with harness context; its `vars` feed judge prompts")
        .argument::<PathBuf>("FILE")
        .optional();
    let json = long("json")
        .help("Print JSON instead of a table")
        .switch();
    let target = positional::<String>("NAME/PATH")
        .help("Name of a built-in assertion or path to a suite JSON file");

    let grade = construct!(Cmd::Grade {
        answer,
        context,
        json,
        target
    })
    .to_options()
    .command("grade")
    .help("Grade an answer");

    let list = pure(Cmd::List)
        .to_options()
        .command("list")
        .help("List built-in assertions");

    let doctor = pure(Cmd::Doctor)
        .to_options()
        .command("doctor")
        .help("Check which toolchains and judge settings are usable");

    let cmd = construct!([grade, list, doctor]);

    construct!(Opts { verbose, cmd })
        .to_options()
        .descr("Extract, run and compare: grading functions for LLM evaluations")
}

/// Resolves `target` to a suite file or a built-in assertion.
fn resolve_suite(target: &str) -> Result<Suite> {
    let path = Path::new(target);
    if path.is_file() {
        return Suite::load(path);
    }
    match catalog::find(target) {
        Some(assertion) => Ok(Suite {
            assertions: vec![assertion],
        }),
        None => bail!("No built-in assertion or suite file named `{target}`; see `verdict list`"),
    }
}

/// Reads the answer from `path`, or stdin when absent.
fn read_answer(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Could not read answer from {}", path.display())),
        None => {
            let mut answer = String::new();
            std::io::stdin()
                .read_to_string(&mut answer)
                .context("Could not read answer from stdin")?;
            Ok(answer)
        }
    }
}

/// Reads harness context JSON.
fn read_context(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read context from {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid context JSON in {}", path.display()))
}

/// Grades an answer and prints the verdicts.
async fn grade(target: &str, answer: Option<&Path>, context: Option<&Path>, json: bool) -> Result<()> {
    let suite = resolve_suite(target)?;
    let answer = read_answer(answer)?;
    let context = context.map(read_context).transpose()?;
    let ctx = GradeContext::from_config().with_context(context);

    let rows: Vec<GradedRow> = suite
        .grade_all(&answer, &ctx)
        .await
        .into_iter()
        .map(|(name, verdict)| GradedRow::new(name, verdict))
        .collect();

    if json {
        println!("{}", render_json(&rows)?);
        return Ok(());
    }

    println!("{}", render_table(&rows));
    let failed = rows.iter().filter(|row| !row.pass).count();
    if failed == 0 {
        println!("{}", format!("All {} assertion(s) passed", rows.len()).green().bold());
    } else {
        println!("{}", format!("{failed} of {} assertion(s) failed", rows.len()).red().bold());
    }
    Ok(())
}

/// Prints every built-in assertion.
fn list() {
    for assertion in catalog::builtin() {
        println!("{:<24} {}", assertion.name.bold(), assertion.description);
    }
}

/// Prints toolchain and judge availability.
async fn doctor() {
    let statuses = health::doctor().await;
    println!("{}", health::render(&statuses));
    let missing = statuses.iter().filter(|status| !status.available).count();
    if missing == 0 {
        println!("{}", "Everything is available".green());
    } else {
        println!("{}", format!("{missing} item(s) unavailable").yellow());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let opts = options().run();

    let level = if opts.verbose { Level::DEBUG } else { Level::INFO };
    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(fmt)
        .with(LevelFilter::from_level(level))
        .init();

    match opts.cmd {
        Cmd::Grade {
            answer,
            context,
            json,
            target,
        } => grade(&target, answer.as_deref(), context.as_deref(), json).await?,
        Cmd::List => list(),
        Cmd::Doctor => doctor().await,
    }

    Ok(())
}
