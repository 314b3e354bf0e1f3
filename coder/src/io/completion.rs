//! Completion service abstraction.
//!
//! The [`CompletionClient`] trait decouples the control loop from the chat
//! backend (an Ollama-compatible `/api/chat` endpoint). Tests use scripted
//! clients that return predetermined replies without network access.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::conversation::Turn;
use crate::io::config::ModelConfig;

/// Abstraction over chat completion backends.
pub trait CompletionClient {
    /// Send the full conversation and return the assistant's reply text.
    fn complete(&self, turns: &[Turn]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
    options: ChatOptions<'a>,
}

#[derive(Debug, Serialize)]
struct ChatOptions<'a> {
    temperature: f64,
    num_predict: u32,
    num_ctx: u32,
    stop: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

enum AttemptError {
    Retryable(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Client for an Ollama-compatible chat endpoint.
pub struct OllamaClient {
    http: Client,
    url: String,
    model: ModelConfig,
}

impl OllamaClient {
    pub fn new(model: ModelConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(model.request_timeout())
            .build()
            .context("building HTTP client")?;
        let url = format!("{}/api/chat", model.endpoint.trim_end_matches('/'));
        Ok(Self { http, url, model })
    }

    fn request_body<'a>(&'a self, turns: &'a [Turn]) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model.name,
            messages: turns,
            stream: false,
            options: ChatOptions {
                temperature: self.model.temperature,
                num_predict: self.model.max_output_tokens,
                num_ctx: self.model.context_window,
                stop: &self.model.stop,
            },
        }
    }

    fn attempt(&self, turns: &[Turn]) -> std::result::Result<String, AttemptError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&self.request_body(turns))
            .send()
            .map_err(|e| {
                AttemptError::Retryable(
                    anyhow::Error::new(e).context(format!("sending chat request to {}", self.url)),
                )
            })?;
        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| AttemptError::Retryable(anyhow::Error::new(e).context("reading chat response body")))?;
        if !status.is_success() {
            let err = anyhow!("chat request failed: status {} body {}", status, text.trim());
            return Err(if is_retryable_status(status) {
                AttemptError::Retryable(err)
            } else {
                AttemptError::Fatal(err)
            });
        }
        let parsed: ChatResponse = serde_json::from_str(&text)
            .context("parsing chat response JSON")
            .map_err(AttemptError::Fatal)?;
        Ok(parsed.message.content)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

impl CompletionClient for OllamaClient {
    #[instrument(skip_all, fields(model = %self.model.name, turns = turns.len()))]
    fn complete(&self, turns: &[Turn]) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(turns) {
                Ok(content) => {
                    debug!(attempt, chars = content.len(), "completion received");
                    return Ok(content);
                }
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retryable(err)) => {
                    if attempt >= self.model.max_retries {
                        warn!(attempts = attempt + 1, "completion retries exhausted");
                        return Err(err.context(format!(
                            "completion failed after {} attempt(s)",
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    let backoff = Duration::from_millis(self.model.retry_backoff_ms * u64::from(attempt));
                    info!(attempt, backoff_ms = backoff.as_millis() as u64, err = %format!("{err:#}"), "retrying completion");
                    thread::sleep(backoff);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::conversation::Conversation;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;

    /// Serve one canned HTTP response per queued entry, recording request bodies.
    fn serve(responses: Vec<(u16, String)>) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for (status, body) in responses {
                let (stream, _) = listener.accept().expect("accept");
                let mut reader = BufReader::new(stream);
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).expect("read header");
                    let trimmed = line.trim_end();
                    if trimmed.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = trimmed.split_once(':') {
                        if name.eq_ignore_ascii_case("content-length") {
                            content_length = value.trim().parse().expect("length");
                        }
                    }
                }
                let mut request_body = vec![0u8; content_length];
                reader.read_exact(&mut request_body).expect("read body");
                tx.send(String::from_utf8_lossy(&request_body).into_owned())
                    .expect("send");
                let mut stream = reader.into_inner();
                let response = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                stream.write_all(response.as_bytes()).expect("write");
            }
        });
        (format!("http://{addr}"), rx)
    }

    fn model(endpoint: String) -> ModelConfig {
        ModelConfig {
            endpoint,
            retry_backoff_ms: 1,
            request_timeout_secs: 10,
            ..ModelConfig::default()
        }
    }

    fn reply(content: &str) -> String {
        serde_json::json!({"message": {"role": "assistant", "content": content}}).to_string()
    }

    #[test]
    fn posts_conversation_with_model_options() {
        let (endpoint, requests) = serve(vec![(200, reply("tool: list_files({})"))]);
        let client = OllamaClient::new(model(endpoint)).expect("client");
        let mut conv = Conversation::new("sys");
        conv.push_user("hi");
        let content = client.complete(conv.turns()).expect("complete");
        assert_eq!(content, "tool: list_files({})");

        let body: serde_json::Value =
            serde_json::from_str(&requests.recv().expect("request")).expect("json");
        assert_eq!(body["model"], "qwen2.5-coder:14b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["options"]["num_ctx"], 8192);
        assert_eq!(body["options"]["stop"][0], "User:");
    }

    #[test]
    fn retries_server_errors_then_succeeds() {
        let (endpoint, _requests) = serve(vec![
            (500, "{}".to_string()),
            (503, "{}".to_string()),
            (200, reply("done.")),
        ]);
        let client = OllamaClient::new(model(endpoint)).expect("client");
        let content = client.complete(Conversation::new("s").turns()).expect("complete");
        assert_eq!(content, "done.");
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (endpoint, _requests) = serve(vec![(404, "{\"error\":\"model not found\"}".to_string())]);
        let client = OllamaClient::new(model(endpoint)).expect("client");
        let err = client
            .complete(Conversation::new("s").turns())
            .expect_err("404 must fail");
        assert!(format!("{err:#}").contains("404"));
    }

    #[test]
    fn gives_up_after_max_retries() {
        let (endpoint, _requests) = serve(vec![
            (500, "{}".to_string()),
            (500, "{}".to_string()),
            (500, "{}".to_string()),
        ]);
        let client = OllamaClient::new(model(endpoint)).expect("client");
        let err = client
            .complete(Conversation::new("s").turns())
            .expect_err("must give up");
        assert!(format!("{err:#}").contains("after 3 attempt(s)"));
    }
}
