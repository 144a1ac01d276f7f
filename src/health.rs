#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Checks which toolchains and judge settings are usable on this machine.

use std::time::Duration;

use futures::future::join_all;
use itertools::Itertools;
use tabled::{
    Table, Tabled,
    settings::{Modify, Style, Width, object::Rows},
};
use which::which;

use crate::{
    config,
    constants::PROBE_TIMEOUT_SECS,
    process::{self, StdinSource},
    runner::Toolchain,
    util::truncate,
};

/// Availability of one tool.
#[derive(Tabled, Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    /// Tool or service name.
    #[tabled(rename = "Tool")]
    pub name:      String,
    /// Whether it can be used.
    #[tabled(rename = "Available")]
    pub available: bool,
    /// Version line, location or what is missing.
    #[tabled(rename = "Detail")]
    pub detail:    String,
}

/// Toolchains with a fixed command line.
fn known_toolchains() -> Vec<Toolchain> {
    vec![
        Toolchain::Python,
        Toolchain::Bash,
        Toolchain::C,
        Toolchain::Cpp,
        Toolchain::Rust,
        Toolchain::Node,
        Toolchain::Sqlite {
            query: String::new(),
        },
    ]
}

/// Runs `<program> --version` for the first candidate found on `PATH`.
async fn probe(candidates: Vec<String>) -> ToolStatus {
    let label = candidates.join("/");
    let Some(path) = candidates.iter().find_map(|name| which(name).ok()) else {
        return ToolStatus {
            name:      label,
            available: false,
            detail:    "not found on PATH".to_string(),
        };
    };

    let outcome = process::run_collect(
        &path,
        &["--version".into()],
        StdinSource::Null,
        None,
        &[],
        Some(Duration::from_secs(PROBE_TIMEOUT_SECS)),
    )
    .await;

    match outcome {
        Ok(collected) => {
            let text = format!("{}\n{}", collected.stdout_text(), collected.stderr_text());
            let version = text
                .lines()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or("no version output")
                .to_string();
            ToolStatus {
                name:      label,
                available: true,
                detail:    truncate(&version, 60),
            }
        }
        Err(err) => {
            tracing::warn!("probing {} failed: {err}", path.display());
            ToolStatus {
                name:      label,
                available: false,
                detail:    truncate(&err.to_string(), 60),
            }
        }
    }
}

/// Probes every toolchain concurrently and reports judge configuration.
/// Never fails.
pub async fn doctor() -> Vec<ToolStatus> {
    let groups = known_toolchains()
        .iter()
        .flat_map(Toolchain::required_programs)
        .unique()
        .collect::<Vec<_>>();

    let mut statuses = join_all(groups.into_iter().map(probe)).await;

    statuses.push(match config::judge_env() {
        Some(env) => ToolStatus {
            name:      "judge".to_string(),
            available: true,
            detail:    format!("{} at {}", env.model(), env.api_base()),
        },
        None => ToolStatus {
            name:      "judge".to_string(),
            available: false,
            detail:    "set OPENAI_API_KEY or LLMFOUNDRY_TOKEN".to_string(),
        },
    });

    statuses
}

/// Renders statuses as a table.
pub fn render(statuses: &[ToolStatus]) -> String {
    Table::new(statuses)
        .with(Modify::new(Rows::new(1..)).with(Width::wrap(60).keep_words(true)))
        .with(Style::modern())
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_tool_is_reported_not_raised() {
        let status = probe(vec!["definitely-not-installed-7a1e".to_string()]).await;
        assert!(!status.available);
        assert_eq!(status.detail, "not found on PATH");
    }

    #[tokio::test]
    async fn doctor_lists_every_toolchain_and_the_judge() {
        let statuses = doctor().await;
        let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
        for expected in ["python3/python", "gcc", "g++", "rustc", "sqlite3", "judge"] {
            assert!(names.contains(&expected), "missing {expected} in {names:?}");
        }
        assert!(render(&statuses).contains("Available"));
    }
}
