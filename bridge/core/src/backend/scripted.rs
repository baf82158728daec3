//! Scripted backend
//!
//! An offline producer: echoes the prompt word by word (or replays a fixed
//! script), one token per interval tick. Used by the daemon when no model
//! server is configured, and by tests under a paused clock.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::traits::{GenerationRequest, GenerativeBackend, StreamingToken};

/// Default spacing between tokens
pub const DEFAULT_TOKEN_INTERVAL: Duration = Duration::from_millis(30);

/// Offline, deterministic backend
#[derive(Clone, Debug)]
pub struct ScriptedBackend {
    interval: Duration,
    script: Option<Vec<String>>,
    fail_with: Option<String>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_INTERVAL)
    }
}

impl ScriptedBackend {
    /// Echo prompts, one word per `interval`
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            script: None,
            fail_with: None,
        }
    }

    /// Replay `tokens` regardless of the prompt
    #[must_use]
    pub fn with_script<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script = Some(tokens.into_iter().map(Into::into).collect());
        self
    }

    /// End every stream with an error instead of completing
    #[must_use]
    pub fn failing(mut self, error: impl Into<String>) -> Self {
        self.fail_with = Some(error.into());
        self
    }

    fn tokens_for(&self, prompt: &str) -> Vec<String> {
        match &self.script {
            Some(script) => script.clone(),
            None => prompt.split_inclusive(char::is_whitespace).map(str::to_string).collect(),
        }
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn generate_streaming(
        &self,
        request: &GenerationRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let tokens = self.tokens_for(&request.prompt);
        let (tx, rx) = mpsc::channel(tokens.len().max(1) + 1);
        let fail_with = self.fail_with.clone();
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            // The first tick completes immediately.
            ticker.tick().await;
            let mut message = String::new();
            for token in tokens {
                ticker.tick().await;
                message.push_str(&token);
                if tx.send(StreamingToken::Token(token)).await.is_err() {
                    return;
                }
            }
            let last = match fail_with {
                Some(error) => StreamingToken::Error(error),
                None => StreamingToken::Complete { message },
            };
            let _ = tx.send(last).await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    async fn collect(mut rx: mpsc::Receiver<StreamingToken>) -> Vec<StreamingToken> {
        let mut out = Vec::new();
        while let Some(token) = rx.recv().await {
            out.push(token);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_echoes_prompt_words_paced() {
        let backend = ScriptedBackend::new(Duration::from_millis(100));
        let started = Instant::now();
        let rx = backend
            .generate_streaming(&GenerationRequest::new("hello brave world", "scripted"))
            .await
            .unwrap();

        let tokens = collect(rx).await;
        assert_eq!(
            tokens,
            vec![
                StreamingToken::Token("hello ".to_string()),
                StreamingToken::Token("brave ".to_string()),
                StreamingToken::Token("world".to_string()),
                StreamingToken::Complete {
                    message: "hello brave world".to_string()
                },
            ]
        );
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_and_failure() {
        let backend = ScriptedBackend::default()
            .with_script(["a", "b"])
            .failing("quota exceeded");
        let rx = backend
            .generate_streaming(&GenerationRequest::new("ignored", "scripted"))
            .await
            .unwrap();

        let tokens = collect(rx).await;
        assert_eq!(tokens.len(), 3);
        assert_eq!(
            tokens.last(),
            Some(&StreamingToken::Error("quota exceeded".to_string()))
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        assert!(ScriptedBackend::default().health_check().await);
    }
}
