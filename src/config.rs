#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Process-wide configuration read from the environment (and `.env`, which
//! the binary loads before anything touches this module).

use std::{
    path::PathBuf,
    sync::{Arc, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use state::InitCell;

use crate::{
    constants::{DEFAULT_COMPILE_TIMEOUT_SECS, DEFAULT_RUN_TIMEOUT_SECS},
    judge::{JudgeClient, JudgeEnv, JudgeError},
    util::parse_secs,
};

/// Runtime configuration shared across the crate.
pub struct ConfigState {
    /// Limit for compile steps.
    compile_timeout: Duration,
    /// Limit for run and inspect steps.
    run_timeout:     Duration,
    /// Parent directory for scratch directories, if overridden.
    scratch_dir:     Option<PathBuf>,
    /// Judge settings, when a credential is present.
    judge:           Option<JudgeEnv>,
    /// Lazily constructed judge client.
    judge_client:    InitCell<JudgeClient>,
}

impl ConfigState {
    /// Reads configuration from the process environment.
    fn new() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let compile_timeout =
            read_timeout_secs(&lookup, "VERDICT_COMPILE_TIMEOUT_SECS", DEFAULT_COMPILE_TIMEOUT_SECS);
        let run_timeout =
            read_timeout_secs(&lookup, "VERDICT_RUN_TIMEOUT_SECS", DEFAULT_RUN_TIMEOUT_SECS);
        let scratch_dir = lookup("VERDICT_SCRATCH_DIR")
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);

        let judge = match JudgeEnv::from_lookup(&lookup) {
            Ok(env) => Some(env),
            Err(err) => {
                tracing::debug!("judge disabled: {err}");
                None
            }
        };

        Self {
            compile_timeout,
            run_timeout,
            scratch_dir,
            judge,
            judge_client: InitCell::new(),
        }
    }

    /// Limit for compile steps.
    pub fn compile_timeout(&self) -> Duration {
        self.compile_timeout
    }

    /// Limit for run and inspect steps.
    pub fn run_timeout(&self) -> Duration {
        self.run_timeout
    }

    /// Directory scratch directories are created in.
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Judge settings, if a credential was configured.
    pub fn judge_env(&self) -> Option<&JudgeEnv> {
        self.judge.as_ref()
    }

    /// Returns the shared judge client, building it on first use.
    pub fn judge_client(&self) -> Result<JudgeClient, JudgeError> {
        if let Some(client) = self.judge_client.try_get() {
            return Ok(client.clone());
        }

        let env = self.judge.clone().ok_or(JudgeError::MissingCredential)?;
        self.judge_client.set(JudgeClient::new(env));
        Ok(self.judge_client.get().clone())
    }
}

/// Shared configuration handle used throughout the crate.
#[derive(Clone)]
pub struct ConfigHandle(Arc<ConfigState>);

impl std::ops::Deref for ConfigHandle {
    type Target = ConfigState;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Global storage for the lazily constructed configuration state.
static CONFIG_SLOT: OnceLock<Mutex<Option<Arc<ConfigState>>>> = OnceLock::new();

/// Returns the mutex guarding the global configuration slot.
fn slot() -> &'static Mutex<Option<Arc<ConfigState>>> {
    CONFIG_SLOT.get_or_init(|| Mutex::new(None))
}

/// Returns the active configuration, reading the environment on first use.
pub fn get() -> ConfigHandle {
    let mut guard = slot().lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(cfg) = guard.as_ref() {
        return ConfigHandle(Arc::clone(cfg));
    }

    let cfg = Arc::new(ConfigState::new());
    *guard = Some(Arc::clone(&cfg));
    ConfigHandle(cfg)
}

/// Returns the configured compile-step limit.
pub fn compile_timeout() -> Duration {
    get().compile_timeout()
}

/// Returns the configured run-step limit.
pub fn run_timeout() -> Duration {
    get().run_timeout()
}

/// Returns the directory scratch directories are created in.
pub fn scratch_root() -> PathBuf {
    get().scratch_root()
}

/// Returns the judge settings, if a credential was configured.
pub fn judge_env() -> Option<JudgeEnv> {
    get().judge_env().cloned()
}

/// Returns the shared judge client.
pub fn judge_client() -> Result<JudgeClient, JudgeError> {
    get().judge_client()
}

/// Parses a variable into a `Duration`, falling back to `default_secs` when
/// parsing fails or the variable is missing.
fn read_timeout_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default_secs: u64,
) -> Duration {
    parse_secs(lookup(key).as_deref())
        .filter(|limit| !limit.is_zero())
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = ConfigState::from_lookup(lookup(&[]));
        assert_eq!(cfg.compile_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.run_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.scratch_root(), std::env::temp_dir());
        assert!(cfg.judge_env().is_none());
        assert!(matches!(cfg.judge_client(), Err(JudgeError::MissingCredential)));
    }

    #[test]
    fn overrides_are_read() {
        let cfg = ConfigState::from_lookup(lookup(&[
            ("VERDICT_COMPILE_TIMEOUT_SECS", "45"),
            ("VERDICT_RUN_TIMEOUT_SECS", "0"),
            ("VERDICT_SCRATCH_DIR", "/var/tmp/verdict"),
            ("OPENAI_API_KEY", "sk-test"),
        ]));
        assert_eq!(cfg.compile_timeout(), Duration::from_secs(45));
        assert_eq!(cfg.run_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.scratch_root(), PathBuf::from("/var/tmp/verdict"));
        assert!(cfg.judge_env().is_some());
        assert!(cfg.judge_client().is_ok());
    }
}
