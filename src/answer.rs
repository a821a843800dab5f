use crate::config::Settings;
use crate::document::Locator;
use crate::error::Result;
use crate::retrieval::RetrievalResult;
use crate::session::ConversationTurn;
use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;

/// Returned without calling the model when retrieval found nothing
pub const NO_INFORMATION_ANSWER: &str =
    "I couldn't find any relevant information in the documents to answer your question.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using only the \
provided document excerpts. Cite every excerpt you rely on with its bracketed number, for example \
[1] or [2][3]. If the excerpts do not contain the answer, say that you don't know instead of \
making one up.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
        }
    }
}

/// One call to a chat-completion service
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A hosted chat-completion model
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String>;
}

/// A retrieved chunk the answer refers to
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    /// The `[n]` marker used in the prompt, 1-based
    pub marker: usize,
    pub chunk_id: String,
    pub document_name: String,
    pub locator: Locator,
}

/// A generated answer and the chunks it cites
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

impl Answer {
    pub fn no_information() -> Self {
        Answer {
            text: NO_INFORMATION_ANSWER.to_string(),
            citations: Vec::new(),
        }
    }

    pub fn cited_ids(&self) -> Vec<String> {
        self.citations.iter().map(|c| c.chunk_id.clone()).collect()
    }
}

/// Builds grounded prompts and turns model output into cited answers
pub struct AnswerComposer<'a> {
    chat: &'a dyn ChatModel,
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
}

impl<'a> AnswerComposer<'a> {
    pub fn new(chat: &'a dyn ChatModel, settings: &'a Settings) -> Self {
        AnswerComposer {
            chat,
            model: &settings.default_model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// Answer `question` from the retrieved chunks.
    ///
    /// `history` holds the earlier turns to include, oldest first.
    pub async fn compose(
        &self,
        question: &str,
        retrieved: &RetrievalResult,
        history: &[ConversationTurn],
    ) -> Result<Answer> {
        if retrieved.is_empty() {
            info!("No chunk passed the similarity threshold, skipping generation");
            return Ok(Answer::no_information());
        }

        let request = CompletionRequest {
            model: self.model,
            messages: build_messages(question, retrieved, history),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(
            "Sending {} messages to {} with {} context chunks",
            request.messages.len(),
            self.model,
            retrieved.len()
        );

        let text = self.chat.complete(&request).await?;

        let citations = cited_markers(&text, retrieved.len())
            .into_iter()
            .map(|marker| {
                let chunk = &retrieved.hits[marker - 1].chunk;
                Citation {
                    marker,
                    chunk_id: chunk.chunk_id.clone(),
                    document_name: chunk.document_name.clone(),
                    locator: chunk.locator,
                }
            })
            .collect();

        Ok(Answer {
            text: text.trim().to_string(),
            citations,
        })
    }
}

/// Render the retrieved chunks as numbered context
pub fn format_context(retrieved: &RetrievalResult) -> String {
    retrieved
        .hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "[{}] ({}, {})\n{}",
                i + 1,
                hit.chunk.document_name,
                hit.chunk.locator,
                hit.chunk.text.trim()
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n")
}

fn build_messages(
    question: &str,
    retrieved: &RetrievalResult,
    history: &[ConversationTurn],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(ChatMessage::new(Role::System, SYSTEM_PROMPT));

    for turn in history {
        messages.push(ChatMessage::new(Role::User, turn.question.as_str()));
        messages.push(ChatMessage::new(Role::Assistant, turn.answer.as_str()));
    }

    messages.push(ChatMessage::new(
        Role::User,
        format!(
            "Context:\n{}\n\nQuestion: {}\n\nAnswer:",
            format_context(retrieved),
            question
        ),
    ));
    messages
}

/// Citation markers in `text` that refer to one of `available` excerpts.
///
/// Accepts `[2]`, `[1][3]` and `[1, 3]`. Returned in order of first use,
/// without duplicates.
fn cited_markers(text: &str, available: usize) -> Vec<usize> {
    let mut markers = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else {
            break;
        };
        let mut inner = &rest[..close];
        // With nested brackets only the innermost one opens a marker
        if let Some(nested) = inner.rfind('[') {
            inner = &inner[nested + 1..];
        }
        if inner.chars().all(|c| c.is_ascii_digit() || c == ',' || c == ' ') {
            for part in inner.split(',') {
                if let Ok(n) = part.trim().parse::<usize>() {
                    if (1..=available).contains(&n) && !markers.contains(&n) {
                        markers.push(n);
                    }
                }
            }
        }
        rest = &rest[close + 1..];
    }

    markers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::TextChunk;
    use crate::database::ScoredChunk;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedChat {
        reply: String,
        calls: AtomicUsize,
        last_messages: Mutex<Vec<ChatMessage>>,
    }

    impl ScriptedChat {
        fn new(reply: &str) -> Self {
            ScriptedChat {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                last_messages: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_messages.lock().unwrap() = request.messages.clone();
            Ok(self.reply.clone())
        }
    }

    fn settings() -> Settings {
        let env: HashMap<&str, &str> = [("OPENAI_API_KEY", "sk-test")].into_iter().collect();
        Settings::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap()
    }

    fn hit(id: &str, text: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: TextChunk {
                chunk_id: id.to_string(),
                document_id: "handbook.pdf".to_string(),
                document_name: "handbook.pdf".to_string(),
                index: 0,
                start: 0,
                end: text.len(),
                locator: Locator::Page(2),
                text: text.to_string(),
            },
            score,
            sequence: 0,
        }
    }

    #[tokio::test]
    async fn test_empty_retrieval_skips_model() {
        let chat = ScriptedChat::new("should not be used");
        let settings = settings();
        let composer = AnswerComposer::new(&chat, &settings);

        let answer = composer
            .compose("What is the refund policy?", &RetrievalResult::default(), &[])
            .await
            .unwrap();

        assert_eq!(answer.text, NO_INFORMATION_ANSWER);
        assert!(answer.citations.is_empty());
        assert_eq!(chat.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_answer_keeps_only_referenced_chunks() {
        let chat = ScriptedChat::new("Refunds take 14 days [2]. See also [2, 9] and [x].");
        let settings = settings();
        let composer = AnswerComposer::new(&chat, &settings);
        let retrieved = RetrievalResult {
            hits: vec![
                hit("handbook.pdf#0", "Shipping is free.", 0.9),
                hit("handbook.pdf#4", "Refunds are issued within 14 days.", 0.8),
            ],
        };
        let history = vec![ConversationTurn {
            question: "Is shipping free?".to_string(),
            answer: "Yes [1].".to_string(),
            cited: vec!["handbook.pdf#0".to_string()],
        }];

        let answer = composer
            .compose("How long do refunds take?", &retrieved, &history)
            .await
            .unwrap();

        assert_eq!(answer.cited_ids(), vec!["handbook.pdf#4".to_string()]);
        assert_eq!(answer.citations[0].marker, 2);
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);

        let messages = chat.last_messages.lock().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Is shipping free?");
        assert_eq!(messages[2].role, Role::Assistant);
        let prompt = &messages[3].content;
        assert!(prompt.contains("[1] (handbook.pdf, page 2)\nShipping is free."));
        assert!(prompt.contains("[2] (handbook.pdf, page 2)\nRefunds are issued within 14 days."));
        assert!(prompt.ends_with("Question: How long do refunds take?\n\nAnswer:"));
    }

    #[test]
    fn test_cited_markers() {
        assert_eq!(cited_markers("a [3] b [1][3] c [2, 1]", 3), vec![3, 1, 2]);
        assert_eq!(cited_markers("[0] [4] [see above] [", 3), Vec::<usize>::new());
        assert_eq!(cited_markers("no citations", 2), Vec::<usize>::new());
        assert_eq!(cited_markers("see [[1]] and [note [2]]", 2), vec![1, 2]);
    }
}
