//! Ollama Backend
//!
//! Streams completions from a local Ollama server via `/api/generate`, which
//! answers with newline-delimited JSON objects:
//!
//! ```text
//! {"response":"Hel","done":false}
//! {"response":"lo","done":false}
//! {"response":"","done":true}
//! ```

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::traits::{GenerationRequest, GenerativeBackend, StreamingToken};

/// Default Ollama host
pub const DEFAULT_OLLAMA_HOST: &str = "localhost";

/// Default Ollama port
pub const DEFAULT_OLLAMA_PORT: u16 = 11434;

const TOKEN_CHANNEL_CAPACITY: usize = 100;

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    host: String,
    port: u16,
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a client for `host:port`
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(host: impl Into<String>, port: u16) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            host: host.into(),
            port,
            http_client,
        })
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }
}

/// One NDJSON line from `/api/generate`
#[derive(Debug, Default, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Splits a byte stream into complete lines
#[derive(Debug, Default)]
struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.push_str(&String::from_utf8_lossy(bytes));
    }

    fn next_line(&mut self) -> Option<String> {
        let pos = self.pending.find('\n')?;
        let line: String = self.pending.drain(..=pos).collect();
        Some(line.trim().to_string())
    }
}

/// Map a parsed line to the token it produces, plus whether it ends the stream
fn interpret(line: GenerateLine, full_response: &mut String) -> (Option<StreamingToken>, bool) {
    if let Some(error) = line.error {
        return (Some(StreamingToken::Error(error)), true);
    }
    if line.done {
        if !line.response.is_empty() {
            full_response.push_str(&line.response);
        }
        return (
            Some(StreamingToken::Complete {
                message: full_response.clone(),
            }),
            true,
        );
    }
    if line.response.is_empty() {
        return (None, false);
    }
    full_response.push_str(&line.response);
    (Some(StreamingToken::Token(line.response)), false)
}

#[async_trait]
impl GenerativeBackend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);

        let body = serde_json::json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": true,
        });

        let response = self
            .http_client
            .post(self.generate_url())
            .json(&body)
            .send()
            .await
            .with_context(|| format!("failed to reach Ollama at {}", self.base_url()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let mut stream = response.bytes_stream();
        let model = request.model.clone();

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();
            let mut full_response = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                };
                lines.push(&bytes);

                while let Some(line) = lines.next_line() {
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = match serde_json::from_str::<GenerateLine>(&line) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            warn!(model = %model, error = %e, "Skipping unparseable Ollama line");
                            continue;
                        }
                    };
                    let (token, finished) = interpret(parsed, &mut full_response);
                    if let Some(token) = token {
                        if tx.send(token).await.is_err() {
                            debug!(model = %model, "Token receiver dropped");
                            return;
                        }
                    }
                    if finished {
                        return;
                    }
                }
            }

            // Stream ended without a done line
            let _ = tx
                .send(StreamingToken::Complete {
                    message: full_response,
                })
                .await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let backend = OllamaBackend::new("example.com", 8080).unwrap();
        assert_eq!(backend.base_url(), "http://example.com:8080");
        assert_eq!(backend.generate_url(), "http://example.com:8080/api/generate");
        assert_eq!(backend.tags_url(), "http://example.com:8080/api/tags");
        assert_eq!(backend.name(), "ollama");
    }

    #[test]
    fn test_line_buffer_handles_split_lines() {
        let mut lines = LineBuffer::default();
        lines.push(br#"{"response":"He"#);
        assert_eq!(lines.next_line(), None);

        lines.push(b"l\"}\n{\"done\":true}\n");
        assert_eq!(lines.next_line().as_deref(), Some(r#"{"response":"Hel"}"#));
        assert_eq!(lines.next_line().as_deref(), Some(r#"{"done":true}"#));
        assert_eq!(lines.next_line(), None);
    }

    #[test]
    fn test_interpret_sequence() {
        let mut full = String::new();
        let parse = |s: &str| serde_json::from_str::<GenerateLine>(s).unwrap();

        let (token, done) = interpret(parse(r#"{"response":"Hi","done":false}"#), &mut full);
        assert_eq!(token, Some(StreamingToken::Token("Hi".to_string())));
        assert!(!done);

        let (token, done) = interpret(parse(r#"{"response":"","done":false}"#), &mut full);
        assert_eq!(token, None);
        assert!(!done);

        let (token, done) = interpret(parse(r#"{"response":"!","done":true}"#), &mut full);
        assert_eq!(
            token,
            Some(StreamingToken::Complete {
                message: "Hi!".to_string()
            })
        );
        assert!(done);
    }

    #[test]
    fn test_interpret_error_line() {
        let mut full = String::new();
        let line: GenerateLine =
            serde_json::from_str(r#"{"error":"model 'nope' not found"}"#).unwrap();
        let (token, done) = interpret(line, &mut full);
        assert_eq!(
            token,
            Some(StreamingToken::Error("model 'nope' not found".to_string()))
        );
        assert!(done);
    }
}
