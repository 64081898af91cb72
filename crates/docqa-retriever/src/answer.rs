//! Turning retrieved chunks into an answer.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use docqa_core::config::GenerationSettings;
use docqa_core::types::RetrievedChunk;

use crate::history::{ChatRecord, HistorySink};

pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information in the documents.";

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions about the documents provided.
Base your answers ONLY on the provided context. If you cannot find the answer in the context, say so.

Follow these guidelines for your response:
1. Provide a clear, well-structured answer
2. Use bullet points or numbered lists where appropriate
3. Break down complex information into sections
4. Summarize key points at the end if the answer is long
5. Be concise but comprehensive
6. If dates, numbers, or specific procedures are mentioned, highlight them

Context: ";

/// Produces answer text for a question from retrieved chunks.
pub trait Generator {
    fn generate(&self, question: &str, chunks: &[RetrievedChunk]) -> Result<String>;
}

/// Chunk contents separated by a blank line.
pub fn build_context(chunks: &[RetrievedChunk]) -> String {
    chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>().join("\n\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<String>,
}

/// Chat completion against a Mistral-compatible HTTP endpoint.
#[derive(Debug, Clone)]
pub struct MistralGenerator {
    api_key: String,
    model: String,
    base_url: String,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: String,
}

impl MistralGenerator {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: &str, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// `None` when no API key is configured.
    pub fn from_settings(settings: &GenerationSettings) -> Option<Self> {
        let key = settings.resolved_api_key()?;
        Some(Self::new(key, settings.model.clone(), &settings.base_url, Duration::from_secs(settings.timeout_secs)))
    }

    fn request_body(&self, question: &str, context: &str) -> ChatRequest<'_> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: format!("{SYSTEM_PROMPT}{context}") },
                ChatMessage { role: "user", content: format!("Please provide a well-structured answer to: {question}") },
            ],
        }
    }
}

impl Generator for MistralGenerator {
    fn generate(&self, question: &str, chunks: &[RetrievedChunk]) -> Result<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::to_value(self.request_body(question, &build_context(chunks)))?;
        debug!(%url, model = %self.model, "requesting chat completion");

        let resp = match ureq::post(&url)
            .timeout(self.timeout)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(body)
        {
            Ok(r) => r,
            Err(ureq::Error::Status(code, r)) => {
                let detail = r.into_string().unwrap_or_default();
                bail!("chat completion failed with status {code}: {}", detail.trim());
            }
            Err(e) => return Err(anyhow!(e).context("calling chat completion endpoint")),
        };
        let reply: ChatResponse = resp.into_json().context("decoding chat completion response")?;
        let answer = reply.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();
        if answer.trim().is_empty() {
            bail!("chat completion returned an empty answer");
        }
        Ok(answer)
    }
}

/// Offline fallback: lists each chunk under its source.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalSummaryGenerator;

impl Generator for LocalSummaryGenerator {
    fn generate(&self, _question: &str, chunks: &[RetrievedChunk]) -> Result<String> {
        let mut answer = String::from("Here's a summary of the relevant information:\n\n");
        for chunk in chunks {
            answer.push_str(&format!("From {}:\n", chunk.source));
            answer.push_str(&format!("• {}\n\n", chunk.content.trim()));
        }
        Ok(answer)
    }
}

pub struct QueryProcessor {
    generator: Box<dyn Generator>,
    history: Box<dyn HistorySink>,
}

impl QueryProcessor {
    pub fn new(generator: Box<dyn Generator>, history: Box<dyn HistorySink>) -> Self {
        Self { generator, history }
    }

    /// Remote generation when an API key is configured, local summary otherwise.
    pub fn from_settings(settings: &GenerationSettings, history: Box<dyn HistorySink>) -> Self {
        let generator: Box<dyn Generator> = match MistralGenerator::from_settings(settings) {
            Some(g) => {
                info!(model = %settings.model, "answering with remote chat completion");
                Box::new(g)
            }
            None => {
                info!("no API key configured, answering with local summary");
                Box::new(LocalSummaryGenerator)
            }
        };
        Self::new(generator, history)
    }

    pub fn process_query(&self, query: &str, chunks: &[RetrievedChunk]) -> Result<Answer> {
        if chunks.is_empty() {
            return Ok(Answer { answer: NO_CONTEXT_ANSWER.to_string(), sources: Vec::new() });
        }
        let mut sources: Vec<String> = Vec::new();
        for chunk in chunks {
            if !sources.contains(&chunk.source) {
                sources.push(chunk.source.clone());
            }
        }

        let answer = self.generator.generate(query, chunks)?;
        let logged = format!("{answer}\n\nSources: {}", sources.join(", "));
        self.history.append(&ChatRecord::new(query, logged)).context("logging interaction")?;
        Ok(Answer { answer, sources })
    }
}
