use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{ChunkStream, GenerateRequest, GenerateResponse, LlmError, LlmProvider, StreamChunk, Usage};

/// Local Ollama server speaking the `/api/generate` protocol.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Serialize)]
struct OllamaOptions {
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

impl OllamaResponse {
    fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(Usage {
            prompt_tokens: self.prompt_eval_count.unwrap_or(0),
            completion_tokens: self.eval_count.unwrap_or(0),
        })
    }
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    async fn send(&self, req: &GenerateRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let body = OllamaRequest {
            model: req.model.as_deref().unwrap_or(&self.model),
            prompt: &req.prompt,
            system: req.system.as_deref(),
            stream,
            options: req.max_tokens.map(|num_predict| OllamaOptions { num_predict }),
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Splits a byte stream into lines. Bytes are decoded only once the whole
/// line has arrived, so multi-byte characters may straddle network chunks.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, data: &[u8]) -> Vec<Result<String, LlmError>> {
        self.pending.extend_from_slice(data);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(line));
        }
        lines
    }

    /// Whatever is left after the stream ends without a trailing newline.
    fn finish(&mut self) -> Option<Result<String, LlmError>> {
        if self.pending.is_empty() {
            return None;
        }
        Some(decode_line(std::mem::take(&mut self.pending)))
    }
}

fn decode_line(bytes: Vec<u8>) -> Result<String, LlmError> {
    String::from_utf8(bytes).map_err(|e| LlmError::Decode(format!("stream line is not utf-8: {e}")))
}

/// Parse one NDJSON line into a chunk. Blank lines yield nothing.
fn parse_line(line: &str) -> Option<Result<StreamChunk, LlmError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<OllamaResponse>(line)
            .map(|r| StreamChunk {
                usage: if r.done { r.usage() } else { None },
                content: r.response,
                done: r.done,
            })
            .map_err(|e| LlmError::Decode(e.to_string())),
    )
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let response = self.send(req, false).await?;
        let parsed: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        if parsed.response.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        let usage = parsed.usage().unwrap_or_default();
        Ok(GenerateResponse {
            content: parsed.response,
            finish_reason: parsed.done_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }

    async fn generate_stream(&self, req: &GenerateRequest) -> Result<ChunkStream, LlmError> {
        let response = self.send(req, true).await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut lines = LineBuffer::default();
            while let Some(next) = bytes.next().await {
                let data = match next {
                    Ok(data) => data,
                    Err(e) => {
                        yield Err(LlmError::Request(e));
                        return;
                    }
                };
                for line in lines.push(&data) {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };
                    if let Some(chunk) = parse_line(&line) {
                        let done = matches!(chunk, Ok(StreamChunk { done: true, .. }));
                        yield chunk;
                        if done {
                            return;
                        }
                    }
                }
            }
            match lines.finish() {
                Some(Ok(line)) => {
                    if let Some(chunk) = parse_line(&line) {
                        yield chunk;
                    }
                }
                Some(Err(e)) => yield Err(e),
                None => {}
            }
        };
        Ok(stream.boxed())
    }
}
