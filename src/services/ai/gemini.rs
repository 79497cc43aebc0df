use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use super::{ChatRequest, Content, ContentRole, FunctionCall, LlmProvider, ModelReply, Part};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 500;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub struct GeminiProvider {
    api_key: String,
    model: String,
    temperature: f32,
    safety_threshold: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: String, temperature: f32, safety_threshold: String) -> Self {
        Self {
            api_key,
            model,
            temperature,
            safety_threshold,
            client: reqwest::Client::new(),
        }
    }

    fn build_payload(&self, request: &ChatRequest<'_>) -> Value {
        let safety_settings: Vec<Value> = HARM_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": self.safety_threshold }))
            .collect();

        let mut payload = json!({
            "contents": encode_contents(request.contents),
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "generationConfig": { "temperature": self.temperature },
            "safetySettings": safety_settings,
        });

        if !request.functions.is_empty() {
            payload["tools"] = json!([{ "functionDeclarations": request.functions }]);
        }

        payload
    }

    async fn send_with_retry(&self, payload: &Value) -> anyhow::Result<Value> {
        let url = format!("{API_BASE}/models/{}:generateContent", self.model);
        let mut retries = 0;
        let mut backoff = INITIAL_BACKOFF_MS;

        loop {
            let res = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(payload)
                .send()
                .await;

            match res {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .json()
                            .await
                            .context("failed to parse Gemini response");
                    }
                    let text = response.text().await.unwrap_or_default();
                    if !(status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS) {
                        anyhow::bail!("Gemini API error ({status}): {text}");
                    }
                    if retries >= MAX_RETRIES {
                        anyhow::bail!("Gemini API error after {retries} retries ({status}): {text}");
                    }
                    tracing::warn!(%status, backoff_ms = backoff, "Gemini transient error, retrying");
                }
                Err(e) => {
                    if retries >= MAX_RETRIES {
                        return Err(e).context(format!("failed to call Gemini API after {retries} retries"));
                    }
                    tracing::warn!(error = %e, backoff_ms = backoff, "Gemini network error, retrying");
                }
            }

            tokio::time::sleep(Duration::from_millis(backoff)).await;
            retries += 1;
            backoff *= 2;
        }
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(&self, request: ChatRequest<'_>) -> anyhow::Result<ModelReply> {
        let payload = self.build_payload(&request);
        tracing::debug!(model = %self.model, contents = request.contents.len(), "sending Gemini request");
        let body = self.send_with_retry(&payload).await?;
        parse_reply(&body)
    }
}

/// Encodes contents for the wire, merging consecutive contents that share a role.
fn encode_contents(contents: &[Content]) -> Vec<Value> {
    let mut encoded: Vec<(ContentRole, Vec<Value>)> = Vec::new();
    for content in contents {
        let parts: Vec<Value> = content.parts.iter().map(encode_part).collect();
        if let Some((role, existing)) = encoded.last_mut() {
            if *role == content.role {
                existing.extend(parts);
                continue;
            }
        }
        encoded.push((content.role, parts));
    }

    encoded
        .into_iter()
        .map(|(role, parts)| json!({ "role": role.as_str(), "parts": parts }))
        .collect()
}

fn encode_part(part: &Part) -> Value {
    match part {
        Part::Text(text) => json!({ "text": text }),
        Part::InlineData { mime_type, data } => {
            json!({ "inlineData": { "mimeType": mime_type, "data": data } })
        }
        Part::FunctionCall(call) => json!({ "functionCall": { "name": call.name, "args": call.args } }),
        Part::FunctionResponse { name, response } => {
            json!({ "functionResponse": { "name": name, "response": response } })
        }
    }
}

fn parse_reply(body: &Value) -> anyhow::Result<ModelReply> {
    let candidate = body["candidates"]
        .get(0)
        .ok_or_else(|| match body["promptFeedback"]["blockReason"].as_str() {
            Some(reason) => anyhow::anyhow!("prompt blocked by Gemini: {reason}"),
            None => anyhow::anyhow!("missing candidates in Gemini response"),
        })?;

    if let Some(reason) = candidate["finishReason"].as_str() {
        if reason == "SAFETY" {
            anyhow::bail!("Gemini response blocked by safety filters");
        }
        if reason != "STOP" {
            tracing::warn!(finish_reason = reason, "Gemini generation stopped abnormally");
        }
    }

    let mut reply = ModelReply::default();
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            if let Some(text) = part["text"].as_str() {
                reply.text.push_str(text);
            }
            if reply.function_call.is_none() && part.get("functionCall").is_some() {
                let call: FunctionCall = serde_json::from_value(part["functionCall"].clone())
                    .context("malformed functionCall in Gemini response")?;
                reply.function_call = Some(call);
            }
        }
    }

    Ok(reply)
}
