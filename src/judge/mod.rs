#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Remote language-model judge used in place of a local comparison.
//!
//! A [`JudgeCriterion`] renders a fixed evaluation prompt around the answer,
//! [`JudgeClient`] sends it to an OpenAI-compatible chat-completions endpoint,
//! and the reply is classified by looking for a marker phrase. [`judge`]
//! folds every failure into [`JudgeOutcome::Unavailable`].

use std::{sync::LazyLock, time::Duration};

use async_openai::{
    Client as OpenAIClient,
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest},
};
use bon::Builder;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    constants::{
        DEFAULT_JUDGE_ENDPOINT, DEFAULT_JUDGE_MODEL, DEFAULT_JUDGE_PROJECT,
        DEFAULT_JUDGE_TIMEOUT_SECS, REASON_TRUNCATE,
    },
    util::{parse_secs, truncate},
    verdict::Verdict,
};

/// Matches `{vars.NAME}` placeholders.
static VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{vars\.([A-Za-z0-9_]+)\}").expect("var regex is valid"));

/// Errors raised while consulting the judge.
#[derive(Error, Debug)]
pub enum JudgeError {
    /// No API key or token was configured.
    #[error("no judge credential configured (set OPENAI_API_KEY or LLMFOUNDRY_TOKEN)")]
    MissingCredential,

    /// The API call failed, including transport and malformed-response errors.
    #[error("judge request failed: {0}")]
    Api(#[from] OpenAIError),

    /// The reply carried no text.
    #[error("judge returned an empty reply")]
    EmptyReply,

    /// No reply arrived within the limit.
    #[error("judge did not answer within {0:?}")]
    TimedOut(Duration),

    /// The request could not be assembled.
    #[error("could not build judge request: {0}")]
    Request(String),
}

/// Connection settings for the judge.
#[derive(Debug, Clone, Builder)]
#[builder(on(String, into))]
pub struct JudgeEnv {
    /// Base URL of the OpenAI-compatible API.
    #[builder(default = DEFAULT_JUDGE_ENDPOINT.to_string())]
    api_base:    String,
    /// Bearer credential.
    api_key:     String,
    /// Model identifier.
    #[builder(default = DEFAULT_JUDGE_MODEL.to_string())]
    model:       String,
    /// Sampling temperature, if overridden.
    temperature: Option<f32>,
    /// Limit for one request, retries included.
    #[builder(default = Duration::from_secs(DEFAULT_JUDGE_TIMEOUT_SECS))]
    timeout:     Duration,
}

impl JudgeEnv {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, JudgeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// `OPENAI_API_KEY` wins over `LLMFOUNDRY_TOKEN`; the latter is suffixed
    /// with `:` and `VERDICT_JUDGE_PROJECT`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, JudgeError> {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let api_key = match (read("OPENAI_API_KEY"), read("LLMFOUNDRY_TOKEN")) {
            (Some(key), _) => key,
            (None, Some(token)) => {
                let project =
                    read("VERDICT_JUDGE_PROJECT").unwrap_or_else(|| DEFAULT_JUDGE_PROJECT.to_string());
                format!("{token}:{project}")
            }
            (None, None) => return Err(JudgeError::MissingCredential),
        };

        Ok(Self {
            api_base: read("OPENAI_ENDPOINT")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_JUDGE_ENDPOINT.to_string()),
            api_key,
            model: read("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_JUDGE_MODEL.to_string()),
            temperature: read("OPENAI_TEMPERATURE").and_then(|t| t.parse::<f32>().ok()),
            timeout: parse_secs(read("VERDICT_JUDGE_TIMEOUT_SECS").as_deref())
                .filter(|limit| !limit.is_zero())
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_JUDGE_TIMEOUT_SECS)),
        })
    }

    /// Base URL of the API.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Limit for one request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct JudgeClient {
    /// Underlying API client.
    client: OpenAIClient<OpenAIConfig>,
    /// Settings the client was built from.
    env:    JudgeEnv,
}

impl JudgeClient {
    /// Builds a client from `env`.
    pub fn new(env: JudgeEnv) -> Self {
        let client = OpenAIClient::with_config(
            OpenAIConfig::new()
                .with_api_base(env.api_base.clone())
                .with_api_key(env.api_key.clone()),
        );
        Self { client, env }
    }

    /// Sends `prompt` as a single user message and returns the reply text.
    pub async fn ask(&self, prompt: &str) -> Result<String, JudgeError> {
        let message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|err| JudgeError::Request(err.to_string()))?;

        let request = CreateChatCompletionRequest {
            model: self.env.model.clone(),
            messages: vec![message.into()],
            temperature: self.env.temperature,
            n: Some(1),
            ..Default::default()
        };

        tracing::debug!(model = %self.env.model, "asking judge");
        let response = tokio::time::timeout(self.env.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| JudgeError::TimedOut(self.env.timeout))??;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(JudgeError::EmptyReply)
    }
}

/// A fixed evaluation prompt and the phrase that means "criterion met".
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
#[builder(on(String, into))]
pub struct JudgeCriterion {
    /// Prompt text; `{answer}` and `{vars.NAME}` are substituted.
    pub template:    String,
    /// Phrase whose presence in the reply means the criterion is met.
    pub marker:      String,
    /// Match the marker case-insensitively.
    #[builder(default)]
    #[serde(default)]
    pub ignore_case: bool,
}

impl JudgeCriterion {
    /// Renders the prompt for `answer`. Variables come from the `vars` object
    /// of `context`; unknown variables are left as written.
    pub fn render(&self, answer: &str, context: Option<&Value>) -> String {
        let vars = context.and_then(|ctx| ctx.get("vars"));
        let with_vars = VAR.replace_all(&self.template, |caps: &Captures<'_>| {
            match vars.and_then(|v| v.get(&caps[1])) {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => caps[0].to_string(),
            }
        });
        with_vars.replace("{answer}", answer)
    }

    /// Whether `reply` contains the marker phrase.
    pub fn is_satisfied(&self, reply: &str) -> bool {
        if self.ignore_case {
            reply.to_lowercase().contains(&self.marker.to_lowercase())
        } else {
            reply.contains(&self.marker)
        }
    }
}

/// Classified judge reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JudgeOutcome {
    /// The reply contained the marker.
    Satisfied {
        /// Raw reply.
        reply: String,
    },
    /// The reply did not contain the marker.
    NotSatisfied {
        /// Raw reply.
        reply: String,
    },
    /// The judge could not be consulted.
    Unavailable {
        /// What went wrong.
        error: String,
    },
}

/// Consults the judge about `answer`. Never fails; every error becomes
/// [`JudgeOutcome::Unavailable`].
pub async fn judge(
    client: Option<&JudgeClient>,
    criterion: &JudgeCriterion,
    answer: &str,
    context: Option<&Value>,
) -> JudgeOutcome {
    let Some(client) = client else {
        return JudgeOutcome::Unavailable {
            error: JudgeError::MissingCredential.to_string(),
        };
    };

    let prompt = criterion.render(answer, context);
    match client.ask(&prompt).await {
        Ok(reply) if criterion.is_satisfied(&reply) => JudgeOutcome::Satisfied { reply },
        Ok(reply) => JudgeOutcome::NotSatisfied { reply },
        Err(err) => {
            tracing::warn!("judge unavailable: {err}");
            JudgeOutcome::Unavailable {
                error: err.to_string(),
            }
        }
    }
}

impl From<JudgeOutcome> for Verdict {
    fn from(outcome: JudgeOutcome) -> Self {
        match outcome {
            JudgeOutcome::Satisfied { reply } => {
                Verdict::pass(format!("Evaluator output: {}", truncate(reply.trim(), REASON_TRUNCATE)))
            }
            JudgeOutcome::NotSatisfied { reply } => {
                Verdict::fail(format!("Evaluator output: {}", truncate(reply.trim(), REASON_TRUNCATE)))
            }
            JudgeOutcome::Unavailable { error } => Verdict::fail(format!("Judge unavailable: {error}")),
        }
    }
}
