use crate::traits::*;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    /// Same as [`new`](Self::new) with an HTTP-level request timeout.
    pub fn with_timeout(
        base_url: String,
        api_key: Option<String>,
        model: String,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Http(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(body);

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api(format!("{}: {}", status, text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
    ) -> Result<GenerateResponse, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });

        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            body["tools"] = json!(tools);
            body["tool_choice"] = json!("auto");
        }

        let json: Value = self
            .post(&body)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_chat_completion(&json)
    }

    async fn stream(&self, messages: &[Message]) -> Result<ChunkStream, ProviderError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        let response = self.post(&body).await?;

        let chunks = response
            .bytes_stream()
            .scan(SseDecoder::default(), |decoder, item| {
                if decoder.is_done() {
                    return futures::future::ready(None);
                }
                let out = match item {
                    Ok(bytes) => decoder.push(&bytes),
                    Err(e) => vec![Err(ProviderError::Http(e.to_string()))],
                };
                futures::future::ready(Some(stream::iter(out)))
            })
            .flatten()
            .boxed();
        Ok(chunks)
    }

    fn name(&self) -> &str {
        "OpenAI Compatible"
    }
}

/// Incremental decoder for `text/event-stream` completion chunks.
///
/// Lines may be split across network reads; partial lines stay buffered
/// until their newline arrives. `data: [DONE]` ends the stream.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    fn is_done(&self) -> bool {
        self.done
    }

    fn push(&mut self, bytes: &[u8]) -> Vec<Result<String, ProviderError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = String::from_utf8_lossy(&line);
            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.done = true;
                break;
            }
            match serde_json::from_str::<Value>(data) {
                Ok(event) => {
                    if let Some(text) = event["choices"][0]["delta"]["content"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                    {
                        out.push(Ok(text.to_string()));
                    }
                }
                Err(e) => out.push(Err(ProviderError::Parse(e.to_string()))),
            }
        }
        out
    }
}

/// Extract content and tool calls from a `/chat/completions` response.
///
/// Tool calls keep their order. Arguments that are not valid JSON are passed
/// through as a string so the caller can reject the call with a reason.
pub fn parse_chat_completion(json: &Value) -> Result<GenerateResponse, ProviderError> {
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

    let message = &choice["message"];
    let content = message["content"].as_str().map(|s| s.to_string());
    let finish_reason = choice["finish_reason"]
        .as_str()
        .unwrap_or("stop")
        .to_string();

    let tool_calls = match message["tool_calls"].as_array() {
        Some(calls) => calls
            .iter()
            .filter_map(|call| {
                let name = call["function"]["name"].as_str()?.to_string();
                let arguments = match &call["function"]["arguments"] {
                    Value::String(raw) if raw.trim().is_empty() => json!({}),
                    Value::String(raw) => {
                        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
                    }
                    Value::Null => json!({}),
                    other => other.clone(),
                };
                Some(ToolCall { name, arguments })
            })
            .collect(),
        None => Vec::new(),
    };

    Ok(GenerateResponse {
        content,
        tool_calls,
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_calls_in_order() {
        let json = json!({
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [
                        { "id": "a", "type": "function", "function": { "name": "find_element", "arguments": "{\"text\":\"Save\"}" } },
                        { "id": "b", "type": "function", "function": { "name": "click_element", "arguments": "{\"element_id\":\"e1\"}" } },
                        { "id": "c", "type": "function", "function": { "name": "wait", "arguments": "" } }
                    ]
                }
            }]
        });

        let response = parse_chat_completion(&json).unwrap();

        let names: Vec<_> = response.tool_calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["find_element", "click_element", "wait"]);
        assert_eq!(response.tool_calls[0].arguments, json!({ "text": "Save" }));
        assert_eq!(response.tool_calls[2].arguments, json!({}));
        assert_eq!(response.finish_reason, "tool_calls");
        assert!(response.content.is_none());
    }

    #[test]
    fn test_bad_arguments_pass_through_as_string() {
        let json = json!({
            "choices": [{
                "message": {
                    "tool_calls": [
                        { "function": { "name": "type_text", "arguments": "{not json" } }
                    ]
                }
            }]
        });

        let response = parse_chat_completion(&json).unwrap();
        assert_eq!(response.tool_calls[0].arguments, json!("{not json"));
        assert_eq!(response.finish_reason, "stop");
    }

    #[test]
    fn test_text_only_response() {
        let json = json!({
            "choices": [{ "message": { "content": "Nothing to do." }, "finish_reason": "stop" }]
        });
        let response = parse_chat_completion(&json).unwrap();
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.content.as_deref(), Some("Nothing to do."));
    }

    #[test]
    fn test_sse_decoder_joins_split_lines() {
        let mut decoder = SseDecoder::default();

        let first = decoder.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Cli\"}}]}\n\ndata: {\"choi");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].as_deref().unwrap(), "Cli");

        let second = decoder.push(b"ces\":[{\"delta\":{\"content\":\"ck\"}}]}\n: keep-alive\n\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].as_deref().unwrap(), "ck");
        assert!(!decoder.is_done());
    }

    #[test]
    fn test_sse_decoder_stops_at_done() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(
            b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"Save\"}}]}\n\
              data: [DONE]\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        );

        let texts: Vec<_> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(texts, vec!["Save"]);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_sse_decoder_reports_garbage() {
        let mut decoder = SseDecoder::default();
        let out = decoder.push(b"data: {oops\n");
        assert!(matches!(out[0], Err(ProviderError::Parse(_))));
    }

    #[test]
    fn test_missing_choices_is_parse_error() {
        let err = parse_chat_completion(&json!({ "error": "nope" })).unwrap_err();
        assert!(matches!(err, ProviderError::Parse(_)));
    }
}
