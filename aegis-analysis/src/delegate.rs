//! Analysis delegate that asks a chat model for a compliance risk score.

use std::sync::Arc;

use aegis_policy::{AnalysisDelegate, AnalysisError};
use async_trait::async_trait;
use tracing::debug;

use crate::model::{AdapterError, ModelAdapter, ScoringRequest};

const SYSTEM_PROMPT: &str =
    "You are a policy compliance reviewer. Answer only in the requested format.";

/// Score and explanation parsed from a model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Risk score as stated by the model.
    pub score: f64,
    /// Optional one-line explanation.
    pub reasoning: Option<String>,
}

/// [`AnalysisDelegate`] backed by any [`ModelAdapter`].
pub struct ModelAnalysisDelegate {
    adapter: Arc<dyn ModelAdapter>,
    max_output_tokens: u32,
}

impl std::fmt::Debug for ModelAnalysisDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelAnalysisDelegate")
            .field("model", &self.adapter.model())
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

impl ModelAnalysisDelegate {
    /// Wraps `adapter`.
    #[must_use]
    pub fn new(adapter: Arc<dyn ModelAdapter>) -> Self {
        Self {
            adapter,
            max_output_tokens: 128,
        }
    }

    /// Caps the reply length requested from the model.
    #[must_use]
    pub const fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    fn request(&self, content: &str, analysis_type: &str) -> ScoringRequest {
        ScoringRequest {
            instructions: SYSTEM_PROMPT.to_owned(),
            prompt: analysis_prompt(content, analysis_type),
            max_output_tokens: self.max_output_tokens,
            temperature: 0.0,
        }
    }
}

#[async_trait]
impl AnalysisDelegate for ModelAnalysisDelegate {
    async fn score(&self, content: &str, analysis_type: &str) -> Result<f64, AnalysisError> {
        let reply = self
            .adapter
            .complete(&self.request(content, analysis_type))
            .await
            .map_err(into_analysis_error)?;
        let verdict = parse_verdict(&reply)?;
        debug!(
            analysis_type,
            model = self.adapter.model(),
            score = verdict.score,
            reasoning = verdict.reasoning.as_deref().unwrap_or(""),
            "analysis verdict received"
        );
        Ok(verdict.score)
    }
}

/// Builds the user prompt for one analysis.
#[must_use]
pub fn analysis_prompt(content: &str, analysis_type: &str) -> String {
    format!(
        "Analyze the following content for {analysis_type} policy compliance.\n\
         Rate the compliance risk from 0.0 (fully compliant) to 1.0 (major violations).\n\
         \n\
         Content: \"{content}\"\n\
         \n\
         Provide your analysis in this format:\n\
         Score: [0.0-1.0]\n\
         Reasoning: [brief explanation]"
    )
}

/// Extracts the `Score:` and `Reasoning:` lines from a model reply.
///
/// # Errors
///
/// Returns [`AnalysisError::Malformed`] when no parseable, finite score is
/// present.
pub fn parse_verdict(reply: &str) -> Result<Verdict, AnalysisError> {
    let mut score = None;
    let mut reasoning = None;

    for line in reply.lines().map(str::trim) {
        if let Some(rest) = strip_label(line, "score") {
            let token = rest
                .split(|c: char| c.is_whitespace() || c == '/')
                .next()
                .unwrap_or_default()
                .trim_matches(|c: char| c == '[' || c == ']' || c == '*');
            score = token.parse::<f64>().ok().filter(|value| value.is_finite());
        } else if let Some(rest) = strip_label(line, "reasoning") {
            let rest = rest.trim();
            if !rest.is_empty() {
                reasoning = Some(rest.to_owned());
            }
        }
    }

    let score = score.ok_or_else(|| {
        AnalysisError::malformed(format!("no score line in model reply: {}", reply.trim()))
    })?;
    Ok(Verdict { score, reasoning })
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let line = line.trim_start_matches('*');
    let (head, rest) = line.split_once(':')?;
    head.trim_end_matches('*')
        .trim()
        .eq_ignore_ascii_case(label)
        .then(|| rest.trim_start_matches('*').trim())
}

fn into_analysis_error(err: AdapterError) -> AnalysisError {
    match err {
        AdapterError::Response(reason) => AnalysisError::malformed(reason),
        other => AnalysisError::unavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::model::AdapterResult;

    struct ScriptedModel {
        reply: Result<&'static str, &'static str>,
        seen: Mutex<Vec<ScoringRequest>>,
    }

    impl ScriptedModel {
        fn replying(reply: &'static str) -> Self {
            Self {
                reply: Ok(reply),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn rejecting(error: &'static str) -> Self {
            Self {
                reply: Err(error),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelAdapter for ScriptedModel {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &ScoringRequest) -> AdapterResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply
                .map(str::to_owned)
                .map_err(|error| AdapterError::Response(error.to_owned()))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ModelAdapter for Unreachable {
        fn model(&self) -> &str {
            "none"
        }

        async fn complete(&self, _request: &ScoringRequest) -> AdapterResult<String> {
            Err(AdapterError::Transport("connection refused".into()))
        }
    }

    #[test]
    fn parses_score_and_reasoning() {
        let verdict = parse_verdict("Score: 0.7\nReasoning: mentions weapons").unwrap();
        assert!((verdict.score - 0.7).abs() < f64::EPSILON);
        assert_eq!(verdict.reasoning.as_deref(), Some("mentions weapons"));
    }

    #[test]
    fn tolerates_common_formatting() {
        assert!((parse_verdict("**Score:** 0.25/1.0").unwrap().score - 0.25).abs() < f64::EPSILON);
        assert!((parse_verdict("  score: [0.9]").unwrap().score - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_score_is_malformed() {
        let err = parse_verdict("I cannot rate this.").unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed { .. }));
        assert!(parse_verdict("Score: high").is_err());
        assert!(parse_verdict("Score: NaN").is_err());
    }

    #[test]
    fn prompt_names_type_and_content() {
        let prompt = analysis_prompt("hello there", "toxicity");
        assert!(prompt.contains("toxicity policy compliance"));
        assert!(prompt.contains("Content: \"hello there\""));
        assert!(prompt.contains("Score: [0.0-1.0]"));
    }

    #[tokio::test]
    async fn scores_with_deterministic_sampling() {
        let model = Arc::new(ScriptedModel::replying("Score: 0.4\nReasoning: mild"));
        let delegate = ModelAnalysisDelegate::new(model.clone()).with_max_output_tokens(16);

        let score = delegate.score("text", "general").await.unwrap();
        assert!((score - 0.4).abs() < f64::EPSILON);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].max_output_tokens, 16);
        assert!(seen[0].temperature.abs() < f32::EPSILON);
        assert_eq!(seen[0].instructions, SYSTEM_PROMPT);
        assert!(seen[0].prompt.contains("general policy compliance"));
    }

    #[tokio::test]
    async fn server_errors_are_malformed() {
        let model = Arc::new(ScriptedModel::rejecting("overloaded"));
        let delegate = ModelAnalysisDelegate::new(model);
        let err = delegate.score("text", "general").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed { .. }));
    }

    #[tokio::test]
    async fn transport_failure_is_unavailable() {
        let delegate = ModelAnalysisDelegate::new(Arc::new(Unreachable));
        let err = delegate.score("text", "general").await.unwrap_err();
        assert!(matches!(err, AnalysisError::Unavailable { .. }));
    }
}
