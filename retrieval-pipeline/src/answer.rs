use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use common::error::AppError;
use serde_json::Value;
use tracing::info;

use crate::RetrievedChunk;

/// Returned verbatim when retrieval produced nothing to ground an answer on.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant context was found in the document store for this question. \
     Ingest the relevant documents first, then ask again.";

pub const QUERY_SYSTEM_PROMPT: &str = "You answer questions about the user's ingested documents. \
     Ground every statement in the context passages provided with the question. \
     If the context does not contain the answer, say so plainly instead of guessing. \
     Answer concisely in plain text.";

/// Pointer back to the stored chunk an answer statement came from.
#[derive(Debug, Clone)]
pub struct SourceRef {
    pub chunk_id: String,
    pub document_id: String,
    pub seq: u32,
    pub score: f32,
}

/// Generated answer text plus the records used as grounding context.
#[derive(Debug)]
pub struct Answer {
    pub content: String,
    pub references: Vec<SourceRef>,
}

impl Answer {
    pub fn no_context() -> Self {
        Self {
            content: NO_CONTEXT_ANSWER.to_string(),
            references: Vec::new(),
        }
    }

    pub fn is_grounded(&self) -> bool {
        !self.references.is_empty()
    }
}

/// Context block for the prompt: chunk texts verbatim, with their ids and
/// rounded scores.
pub fn chunks_to_context(chunks: &[RetrievedChunk]) -> Value {
    fn round_score(value: f32) -> f64 {
        (f64::from(value) * 1000.0).round() / 1000.0
    }

    serde_json::json!(chunks
        .iter()
        .map(|entry| {
            serde_json::json!({
                "id": entry.chunk.id,
                "document_id": entry.chunk.document_id,
                "position": entry.chunk.seq,
                "content": entry.chunk.text,
                "score": round_score(entry.score),
            })
        })
        .collect::<Vec<_>>())
}

pub fn create_user_message(context_json: &Value, question: &str) -> String {
    format!(
        r"
        Context Information:
        ==================
        {context_json}

        User Question:
        ==================
        {question}
        "
    )
}

pub fn create_chat_request(
    user_message: String,
    model: &str,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    CreateChatCompletionRequestArgs::default()
        .model(model)
        .messages([
            ChatCompletionRequestSystemMessage::from(QUERY_SYSTEM_PROMPT).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .build()
}

pub fn process_llm_response(response: CreateChatCompletionResponse) -> Result<String, AppError> {
    response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .map(|content| content.trim().to_string())
        .ok_or(AppError::LLMParsing(
            "No content found in LLM response".into(),
        ))
}

/// Produces a grounded answer for the question. An empty context is handled
/// explicitly: the fixed no-context answer is returned and the model is not
/// called, so a missing corpus can never turn into a fabricated answer.
pub async fn generate(
    client: &Client<OpenAIConfig>,
    model: &str,
    question: &str,
    chunks: &[RetrievedChunk],
) -> Result<Answer, AppError> {
    if chunks.is_empty() {
        info!("no retrieval context available; returning explicit no-context answer");
        return Ok(Answer::no_context());
    }

    let context_json = chunks_to_context(chunks);
    let user_message = create_user_message(&context_json, question);
    let request = create_chat_request(user_message, model).map_err(AppError::Generation)?;

    let response = client
        .chat()
        .create(request)
        .await
        .map_err(AppError::Generation)?;
    let content = process_llm_response(response)?;

    let references = chunks
        .iter()
        .map(|entry| SourceRef {
            chunk_id: entry.chunk.id.clone(),
            document_id: entry.chunk.document_id.clone(),
            seq: entry.chunk.seq,
            score: entry.score,
        })
        .collect();

    Ok(Answer {
        content,
        references,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::document_chunk::DocumentChunk;

    fn retrieved(text: &str, score: f32) -> RetrievedChunk {
        RetrievedChunk {
            chunk: DocumentChunk::new("doc_1".into(), 0, 0, text.to_owned(), vec![0.1, 0.2]),
            score,
        }
    }

    #[tokio::test]
    async fn test_generate_with_empty_context_short_circuits() {
        // Points at a closed port: the model must not be contacted at all.
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key("test-key")
                .with_api_base("http://127.0.0.1:1/v1"),
        );

        let answer = generate(&client, "test-model", "what is in my documents?", &[])
            .await
            .expect("no-context generation should not fail");

        assert_eq!(answer.content, NO_CONTEXT_ANSWER);
        assert!(!answer.is_grounded());
    }

    #[test]
    fn test_user_message_embeds_context_verbatim() {
        let chunks = vec![retrieved("The warranty lasts 24 months.", 0.91)];
        let context = chunks_to_context(&chunks);
        let message = create_user_message(&context, "how long is the warranty?");

        assert!(message.contains("The warranty lasts 24 months."));
        assert!(message.contains("how long is the warranty?"));
    }

    #[test]
    fn test_context_json_carries_attribution_fields() {
        let chunks = vec![retrieved("chunk body", 0.123_456)];
        let context = chunks_to_context(&chunks);
        let entries = context.as_array().expect("context should be an array");
        assert_eq!(entries.len(), 1);
        let entry = entries.first().expect("entry should exist");
        assert_eq!(entry.get("document_id").and_then(Value::as_str), Some("doc_1"));
        assert_eq!(entry.get("score").and_then(Value::as_f64), Some(0.123));
    }

    #[test]
    fn test_process_llm_response_extracts_first_choice() {
        let response: CreateChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1,
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "  The answer.  "},
                "finish_reason": "stop"
            }]
        }))
        .expect("response fixture should deserialize");

        let content = process_llm_response(response).expect("parse failed");
        assert_eq!(content, "The answer.");
    }

    #[test]
    fn test_process_llm_response_without_choices_is_error() {
        let response: CreateChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1,
            "model": "test-model",
            "choices": []
        }))
        .expect("response fixture should deserialize");

        let err = process_llm_response(response);
        assert!(matches!(err, Err(AppError::LLMParsing(_))));
    }
}
