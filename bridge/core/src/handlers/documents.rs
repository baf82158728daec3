//! Document routes
//!
//! `saveFile` writes under a fixed root directory; paths from the surface are
//! relative and may not climb out of it. `analyzeText` returns simple counts.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tracing::info;

use super::{reply_on_failure, unexpected};
use crate::endpoint::Outbox;
use crate::messages::{
    AnalysisResultPayload, AnalyzeTextPayload, FileSavedPayload, MessageType, SaveFilePayload,
    WordFrequency,
};
use crate::router::{GroupRoutes, Handler, Request, RouteGroup, RouterError};

/// Default number of frequent words reported
pub const DEFAULT_TOP_WORDS: usize = 10;

const OWNED: &[MessageType] = &[MessageType::SaveFile, MessageType::AnalyzeText];

/// `saveFile` / `analyzeText`
#[derive(Clone)]
pub struct DocumentRoutes {
    handler: Arc<DocumentHandler>,
}

impl DocumentRoutes {
    /// Save under `root`, report `top_words` frequent words by default
    pub fn new(root: impl Into<PathBuf>, top_words: usize, outbox: Outbox) -> Self {
        Self {
            handler: Arc::new(DocumentHandler {
                root: root.into(),
                top_words,
                outbox,
            }),
        }
    }
}

impl RouteGroup for DocumentRoutes {
    fn name(&self) -> &'static str {
        "documents"
    }

    fn owned_types(&self) -> &'static [MessageType] {
        OWNED
    }

    fn register_routes(&self, routes: &mut GroupRoutes<'_>) -> Result<(), RouterError> {
        let handler: Arc<dyn Handler> = self.handler.clone();
        routes
            .route_shared(MessageType::SaveFile, Arc::clone(&handler))?
            .route_shared(MessageType::AnalyzeText, handler)?;
        Ok(())
    }
}

struct DocumentHandler {
    root: PathBuf,
    top_words: usize,
    outbox: Outbox,
}

impl DocumentHandler {
    async fn save(&self, request: &Request) -> anyhow::Result<()> {
        let save: SaveFilePayload = request.payload_as()?;
        let relative = confine(&save.path)?;
        let target = self.root.join(relative);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&target, save.contents.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;

        let bytes = save.contents.len() as u64;
        info!(path = %save.path, bytes, "File saved");
        self.outbox
            .reply(
                MessageType::FileSaved,
                request.request_id.clone(),
                &FileSavedPayload {
                    path: save.path,
                    bytes,
                },
            )
            .await?;
        Ok(())
    }

    async fn analyze(&self, request: &Request) -> anyhow::Result<()> {
        let analyze: AnalyzeTextPayload = request.payload_as()?;
        let result = analyze_text(&analyze.text, analyze.top_words.unwrap_or(self.top_words));
        self.outbox
            .reply(MessageType::AnalysisResult, request.request_id.clone(), &result)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Handler for DocumentHandler {
    async fn handle(&self, request: Request) -> anyhow::Result<()> {
        let result = match request.kind {
            MessageType::SaveFile => self.save(&request).await,
            MessageType::AnalyzeText => self.analyze(&request).await,
            other => Err(unexpected(other, "documents")),
        };
        reply_on_failure(&self.outbox, &request, result).await
    }
}

/// Accept only plain relative paths
fn confine(path: &str) -> anyhow::Result<&Path> {
    let candidate = Path::new(path);
    anyhow::ensure!(!path.trim().is_empty(), "empty path");
    for component in candidate.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => anyhow::bail!("path '{path}' escapes the document root"),
            Component::RootDir | Component::Prefix(_) => {
                anyhow::bail!("path '{path}' must be relative")
            }
        }
    }
    Ok(candidate)
}

/// Word, sentence and character counts plus the `top_n` most frequent words
#[must_use]
pub fn analyze_text(text: &str, top_n: usize) -> AnalysisResultPayload {
    let words: Vec<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();

    let mut sentences = text
        .split(&['.', '!', '?'][..])
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .count();
    if sentences == 0 && !words.is_empty() {
        sentences = 1;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in &words {
        *counts.entry(word.as_str()).or_default() += 1;
    }
    let mut frequencies: Vec<WordFrequency> = counts
        .into_iter()
        .map(|(word, count)| WordFrequency {
            word: word.to_string(),
            count,
        })
        .collect();
    frequencies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.word.cmp(&b.word)));
    frequencies.truncate(top_n);

    let average_words_per_sentence = if sentences == 0 {
        0.0
    } else {
        words.len() as f64 / sentences as f64
    };

    AnalysisResultPayload {
        words: words.len(),
        sentences,
        characters: text.chars().count(),
        average_words_per_sentence,
        top_words: frequencies,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Envelope, ErrorPayload, RequestId};
    use crate::router::Router;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc;

    fn setup(root: &Path) -> (Router, mpsc::Receiver<crate::messages::Envelope>) {
        let (outbox, rx) = Outbox::channel(8);
        let mut router = Router::new();
        router
            .mount(&DocumentRoutes::new(root, DEFAULT_TOP_WORDS, outbox))
            .unwrap();
        (router, rx)
    }

    #[test]
    fn test_analyze_counts() {
        let result = analyze_text("The cat sat. The cat ran! Did it?", 2);
        assert_eq!(result.words, 8);
        assert_eq!(result.sentences, 3);
        assert_eq!(result.characters, 33);
        assert!((result.average_words_per_sentence - 8.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(
            result.top_words,
            vec![
                WordFrequency {
                    word: "cat".to_string(),
                    count: 2
                },
                WordFrequency {
                    word: "the".to_string(),
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn test_analyze_edge_cases() {
        let empty = analyze_text("", 5);
        assert_eq!(empty.words, 0);
        assert_eq!(empty.sentences, 0);
        assert_eq!(empty.average_words_per_sentence, 0.0);

        let unterminated = analyze_text("no full stop here", 5);
        assert_eq!(unterminated.sentences, 1);
        assert_eq!(unterminated.words, 4);

        let contraction = analyze_text("Don't stop. 'Quoted' words.", 5);
        assert!(contraction.top_words.iter().any(|w| w.word == "don't"));
        assert!(contraction.top_words.iter().any(|w| w.word == "quoted"));
    }

    #[test]
    fn test_confine_rejects_escapes() {
        assert!(confine("notes/today.md").is_ok());
        assert!(confine("./draft.txt").is_ok());
        assert!(confine("../outside.txt").is_err());
        assert!(confine("a/../../b").is_err());
        assert!(confine("/etc/passwd").is_err());
        assert!(confine("  ").is_err());
    }

    #[tokio::test]
    async fn test_save_file_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = setup(dir.path());

        let request = Envelope::with_payload(
            MessageType::SaveFile,
            &SaveFilePayload {
                path: "drafts/essay.md".to_string(),
                contents: "# Title\n".to_string(),
            },
        )
        .unwrap()
        .with_request_id(RequestId::from("req_save"));
        assert!(router.dispatch(request).await.is_handled());

        let written = std::fs::read_to_string(dir.path().join("drafts/essay.md")).unwrap();
        assert_eq!(written, "# Title\n");

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.kind, MessageType::FileSaved);
        let saved: FileSavedPayload = reply.payload_as().unwrap();
        assert_eq!(saved.bytes, 8);
    }

    #[tokio::test]
    async fn test_save_outside_root_replies_error() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = setup(dir.path());

        let request = Envelope::with_payload(
            MessageType::SaveFile,
            &SaveFilePayload {
                path: "../escape.txt".to_string(),
                contents: "x".to_string(),
            },
        )
        .unwrap()
        .with_request_id(RequestId::from("req_esc"));
        assert!(!router.dispatch(request).await.is_handled());

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.kind, MessageType::Error);
        let error: ErrorPayload = reply.payload_as().unwrap();
        assert!(error.message.contains("escapes the document root"));
        assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_analyze_route_uses_default_top_words() {
        let dir = tempfile::tempdir().unwrap();
        let (router, mut rx) = setup(dir.path());

        let request = Envelope::with_payload(
            MessageType::AnalyzeText,
            &AnalyzeTextPayload {
                text: "one two three".to_string(),
                top_words: None,
            },
        )
        .unwrap();
        assert!(router.dispatch(request).await.is_handled());

        let result: AnalysisResultPayload = rx.recv().await.unwrap().payload_as().unwrap();
        assert_eq!(result.words, 3);
        assert_eq!(result.top_words.len(), 3);
    }
}
