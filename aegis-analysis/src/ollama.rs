//! Client for a local `Ollama` daemon's chat endpoint.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use hyper::body::to_bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Request, Uri};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::http_client::{HyperClient, build_client};
use crate::model::{AdapterError, AdapterResult, ModelAdapter, ScoringRequest};

/// Base URL of a daemon running on the local machine.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434/";
/// Default bound on one HTTP round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for [`OllamaAdapter`].
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    base_url: String,
    model: String,
    request_timeout: Duration,
}

impl OllamaConfig {
    /// Creates settings for `model` against the local daemon.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_owned(),
            model: model.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Points the adapter at another daemon. A trailing slash is added when
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the URL has no http(s)
    /// scheme or cannot be parsed.
    pub fn with_base_url(mut self, base_url: &str) -> AdapterResult<Self> {
        let mut base = base_url.trim().to_owned();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(AdapterError::Configuration(format!(
                "Ollama base URL `{base}` must start with http:// or https://"
            )));
        }
        if !base.ends_with('/') {
            base.push('/');
        }
        self.base_url = base;
        Ok(self)
    }

    /// Bounds each HTTP round trip.
    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Returns the normalized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// [`ModelAdapter`] backed by `POST {base_url}api/chat`.
pub struct OllamaAdapter {
    client: HyperClient,
    chat_endpoint: Uri,
    model: String,
    request_timeout: Duration,
}

impl fmt::Debug for OllamaAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaAdapter")
            .field("model", &self.model)
            .field("chat_endpoint", &self.chat_endpoint)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl OllamaAdapter {
    /// Creates an adapter from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Configuration`] if the chat endpoint URL is
    /// invalid.
    pub fn new(config: OllamaConfig) -> AdapterResult<Self> {
        let chat_endpoint = format!("{}api/chat", config.base_url)
            .parse::<Uri>()
            .map_err(|err| {
                AdapterError::Configuration(format!("invalid Ollama endpoint: {err}"))
            })?;

        Ok(Self {
            client: build_client(),
            chat_endpoint,
            model: config.model,
            request_timeout: config.request_timeout,
        })
    }

    fn chat_body<'a>(&'a self, request: &'a ScoringRequest) -> ChatBody<'a> {
        ChatBody {
            model: &self.model,
            stream: false,
            messages: [
                ChatTurn {
                    role: "system",
                    content: &request.instructions,
                },
                ChatTurn {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            options: SamplingOptions {
                temperature: request.temperature,
                num_predict: request.max_output_tokens,
            },
        }
    }
}

#[async_trait]
impl ModelAdapter for OllamaAdapter {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ScoringRequest) -> AdapterResult<String> {
        let body = serde_json::to_vec(&self.chat_body(request))
            .map_err(|err| AdapterError::Configuration(format!("unencodable request: {err}")))?;

        let http_request = Request::post(self.chat_endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|err| AdapterError::Configuration(err.to_string()))?;

        let response = timeout(self.request_timeout, self.client.request(http_request))
            .await
            .map_err(|_| {
                AdapterError::Transport(format!(
                    "no reply from {} within {:?}",
                    self.chat_endpoint, self.request_timeout
                ))
            })?
            .map_err(|err| AdapterError::Transport(err.to_string()))?;

        let status = response.status();
        let bytes = to_bytes(response.into_body())
            .await
            .map_err(|err| AdapterError::Transport(err.to_string()))?;
        if !status.is_success() {
            return Err(AdapterError::Response(format!(
                "status {status}: {}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        reply_text(&bytes)
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    stream: bool,
    messages: [ChatTurn<'a>; 2],
    options: SamplingOptions,
}

#[derive(Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct SamplingOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    message: Option<ReplyMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

fn reply_text(bytes: &[u8]) -> AdapterResult<String> {
    let reply: ChatReply = serde_json::from_slice(bytes)
        .map_err(|err| AdapterError::Response(format!("undecodable body: {err}")))?;
    if let Some(error) = reply.error {
        return Err(AdapterError::Response(error));
    }
    reply
        .message
        .map(|message| message.content)
        .ok_or_else(|| AdapterError::Response("reply carried no message".to_owned()))
}
