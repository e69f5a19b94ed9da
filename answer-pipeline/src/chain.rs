use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
        ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::session::{format_history, Turn};

/// A document cited by the generation chain. The raw source locator comes
/// from the document's metadata; the excerpt is the supporting passage when
/// the backend provides one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDocument {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
}

/// Typed result of one generation-chain invocation.
///
/// The cited documents are explicitly optional: an absent sequence is a valid
/// zero-source answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResult {
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_documents: Option<Vec<SourceDocument>>,
}

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Generation backend error: {0}")]
    Backend(#[from] OpenAIError),

    #[error("Generation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed generation response: {0}")]
    Malformed(String),
}

/// External answer-generation capability: maps (question, history) to an
/// answer plus cited source documents.
#[async_trait]
pub trait AnswerChain: Send + Sync {
    async fn run(&self, question: &str, history: &[Turn])
        -> Result<AnswerResult, GenerationError>;
}

pub static QUERY_SYSTEM_PROMPT: &str = "\
You are a question answering assistant backed by a document knowledge base. \
Answer the user's question from the retrieved context available to you, \
taking the chat history into account. Cite every document you drew on in \
source_documents, using each document's source URI exactly as given. If the \
answer is not in the context, say you don't know and cite no documents.";

/// Answer chain backed by an OpenAI-compatible chat-completion endpoint with
/// a structured JSON-schema response.
pub struct OpenAiAnswerChain {
    client: Arc<Client<OpenAIConfig>>,
    model: String,
}

impl OpenAiAnswerChain {
    pub fn new(client: Arc<Client<OpenAIConfig>>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    fn create_chat_request(
        &self,
        user_message: String,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Question answering with cited sources".into()),
                name: "answer_with_sources".into(),
                schema: Some(get_answer_response_schema()),
                strict: Some(true),
            },
        };

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(QUERY_SYSTEM_PROMPT).into(),
                ChatCompletionRequestUserMessage::from(user_message).into(),
            ])
            .response_format(response_format)
            .build()
    }
}

#[async_trait]
impl AnswerChain for OpenAiAnswerChain {
    async fn run(
        &self,
        question: &str,
        history: &[Turn],
    ) -> Result<AnswerResult, GenerationError> {
        let request = self.create_chat_request(create_user_message(question, history))?;
        let response = self.client.chat().create(request).await?;
        process_chain_response(response)
    }
}

pub fn create_user_message(question: &str, history: &[Turn]) -> String {
    format!(
        r"
        Chat history:
        ==================
        {}

        User Question:
        ==================
        {}
        ",
        format_history(history),
        question
    )
}

fn get_answer_response_schema() -> Value {
    json!({
       "type": "object",
       "properties": {
           "answer": { "type": "string" },
           "source_documents": {
               "type": "array",
               "items": {
                   "type": "object",
                   "properties": {
                       "source": { "type": "string" },
                       "excerpt": { "type": ["string", "null"] },
                   },
               "required": ["source", "excerpt"],
               "additionalProperties": false,
               }
           }
       },
       "required": ["answer", "source_documents"],
       "additionalProperties": false
    })
}

pub fn process_chain_response(
    response: CreateChatCompletionResponse,
) -> Result<AnswerResult, GenerationError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .ok_or(GenerationError::Malformed(
            "No content found in chain response".into(),
        ))
        .and_then(|content| {
            serde_json::from_str::<AnswerResult>(content).map_err(|e| {
                GenerationError::Malformed(format!(
                    "Failed to parse chain response into an answer: {e}"
                ))
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_user_message_includes_history_and_question() {
        let history = vec![Turn::new("What is Rust?", "A systems language.")];
        let message = create_user_message("Who makes it?", &history);

        assert!(message.contains("User: What is Rust?"));
        assert!(message.contains("AI: A systems language."));
        assert!(message.contains("Who makes it?"));
    }

    #[test]
    fn test_answer_result_without_documents_field() {
        let result: AnswerResult =
            serde_json::from_str(r#"{"answer": "Plain answer."}"#).expect("should parse");

        assert_eq!(result.answer, "Plain answer.");
        assert!(result.source_documents.is_none());
    }

    #[test]
    fn test_answer_result_with_documents() {
        let result: AnswerResult = serde_json::from_str(
            r#"{
                "answer": "Cited answer.",
                "source_documents": [
                    {"source": "s3://kb/Documents/a.pdf", "excerpt": "passage"},
                    {"source": "s3://kb/Documents/b.pdf", "excerpt": null}
                ]
            }"#,
        )
        .expect("should parse");

        let documents = result.source_documents.expect("documents should be present");
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].source, "s3://kb/Documents/a.pdf");
        assert_eq!(documents[0].excerpt.as_deref(), Some("passage"));
        assert!(documents[1].excerpt.is_none());
    }

    #[test]
    fn test_process_chain_response_without_choices_is_malformed() {
        let response: CreateChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [],
            "created": 0,
            "model": "test-model",
            "object": "chat.completion"
        }))
        .expect("response fixture should deserialize");

        let result = process_chain_response(response);
        assert!(matches!(result, Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn test_process_chain_response_parses_structured_content() {
        let response: CreateChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "finish_reason": "stop",
                "message": {
                    "role": "assistant",
                    "content": "{\"answer\": \"Refunds within 30 days.\", \"source_documents\": []}"
                }
            }],
            "created": 0,
            "model": "test-model",
            "object": "chat.completion"
        }))
        .expect("response fixture should deserialize");

        let result = process_chain_response(response).expect("should parse content");
        assert_eq!(result.answer, "Refunds within 30 days.");
        assert_eq!(result.source_documents, Some(vec![]));
    }
}
