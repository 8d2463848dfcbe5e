//! Model-backed content analysis for Aegis analysis rules.
//!
//! [`ModelAnalysisDelegate`] turns a chat model reply into a risk score for
//! [`aegis_policy::RuleKind::AiAnalysis`] rules. [`OllamaAdapter`] talks to a
//! local `Ollama` daemon; other backends implement [`ModelAdapter`].

#![warn(missing_docs, clippy::pedantic)]

pub mod delegate;
pub mod model;
pub mod ollama;

mod http_client;

pub use delegate::{ModelAnalysisDelegate, Verdict, analysis_prompt, parse_verdict};
pub use model::{AdapterError, AdapterResult, ModelAdapter, ScoringRequest};
pub use ollama::{DEFAULT_OLLAMA_URL, DEFAULT_REQUEST_TIMEOUT, OllamaAdapter, OllamaConfig};
