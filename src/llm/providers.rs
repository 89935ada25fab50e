//! Provider wire formats.
//!
//! The provider family is a closed set of variants that differ only in how
//! the request is shaped and the response parsed. OpenAI-style providers
//! (OpenAI, DeepSeek) inline the system prompt as the first message;
//! Anthropic separates it into a top-level `system` field and requires
//! `max_tokens`.

use serde_json::{json, Value};

use crate::models::{ChatMessage, ChatRole};

use super::{LlmError, LlmParams, LlmResponse, TokenUsage};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const DEEPSEEK_URL: &str = "https://api.deepseek.com/v1/chat/completions";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_DEFAULT_MAX_TOKENS: u32 = 4096;

/// A fully built HTTP request, ready to send.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Known model prefixes and the provider they route to.
pub const MODEL_PREFIXES: [(&str, ProviderKind); 4] = [
    ("gpt-", ProviderKind::OpenAi),
    ("o1", ProviderKind::OpenAi),
    ("claude-", ProviderKind::Anthropic),
    ("deepseek-", ProviderKind::DeepSeek),
];

/// The closed set of supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    DeepSeek,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::DeepSeek => "deepseek",
        }
    }

    /// Resolve a model string to its provider by prefix match.
    pub fn detect(model: &str) -> Result<Self, LlmError> {
        MODEL_PREFIXES
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| LlmError::UnknownModel(model.to_string()))
    }

    /// Build the provider-specific request.
    pub fn build_request(
        &self,
        api_key: &str,
        system_prompt: &str,
        messages: &[ChatMessage],
        model: &str,
        params: &LlmParams,
    ) -> WireRequest {
        match self {
            ProviderKind::OpenAi => {
                openai_style_request(OPENAI_URL, api_key, system_prompt, messages, model, params)
            }
            ProviderKind::DeepSeek => {
                openai_style_request(DEEPSEEK_URL, api_key, system_prompt, messages, model, params)
            }
            ProviderKind::Anthropic => anthropic_request(api_key, system_prompt, messages, model, params),
        }
    }

    /// Parse a 200 response body into the normalized shape.
    pub fn parse_response(&self, body: &Value, model: &str) -> Result<LlmResponse, LlmError> {
        match self {
            ProviderKind::OpenAi | ProviderKind::DeepSeek => parse_openai_style(body, model, self.name()),
            ProviderKind::Anthropic => parse_anthropic(body, model),
        }
    }
}

fn wire_role(role: ChatRole) -> &'static str {
    role.as_str()
}

fn apply_extras(body: &mut Value, params: &LlmParams) {
    if let Some(obj) = body.as_object_mut() {
        for (k, v) in &params.extra {
            obj.insert(k.clone(), v.clone());
        }
    }
}

fn openai_style_request(
    url: &str,
    api_key: &str,
    system_prompt: &str,
    messages: &[ChatMessage],
    model: &str,
    params: &LlmParams,
) -> WireRequest {
    let mut wire_messages = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        wire_messages.push(json!({"role": "system", "content": system_prompt}));
    }
    for m in messages {
        wire_messages.push(json!({"role": wire_role(m.role), "content": m.content}));
    }

    let mut body = json!({
        "model": model,
        "messages": wire_messages,
    });
    if let Some(t) = params.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(mt) = params.max_tokens {
        body["max_tokens"] = json!(mt);
    }
    apply_extras(&mut body, params);

    WireRequest {
        url: url.to_string(),
        headers: vec![
            ("Authorization".to_string(), format!("Bearer {api_key}")),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body,
    }
}

fn anthropic_request(
    api_key: &str,
    system_prompt: &str,
    messages: &[ChatMessage],
    model: &str,
    params: &LlmParams,
) -> WireRequest {
    // System content never travels in the message list; any system-role
    // entries are folded into the top-level field.
    let mut system = system_prompt.to_string();
    let mut wire_messages = Vec::with_capacity(messages.len());
    for m in messages {
        if m.role == ChatRole::System {
            if !system.is_empty() {
                system.push('\n');
            }
            system.push_str(&m.content);
        } else {
            wire_messages.push(json!({"role": wire_role(m.role), "content": m.content}));
        }
    }

    let mut body = json!({
        "model": model,
        "messages": wire_messages,
        "max_tokens": params.max_tokens.unwrap_or(ANTHROPIC_DEFAULT_MAX_TOKENS),
    });
    if let Some(t) = params.temperature {
        body["temperature"] = json!(t);
    }
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    apply_extras(&mut body, params);

    WireRequest {
        url: ANTHROPIC_URL.to_string(),
        headers: vec![
            ("x-api-key".to_string(), api_key.to_string()),
            ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body,
    }
}

fn parse_openai_style(body: &Value, model: &str, provider: &'static str) -> Result<LlmResponse, LlmError> {
    let content = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| LlmError::InvalidResponse("missing choices[0].message.content".to_string()))?
        .to_string();

    Ok(LlmResponse {
        content,
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string(),
        provider,
        usage: parse_usage(body.get("usage"), "prompt_tokens", "completion_tokens"),
    })
}

fn parse_anthropic(body: &Value, model: &str) -> Result<LlmResponse, LlmError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| LlmError::InvalidResponse("missing content array".to_string()))?;

    let mut content = String::new();
    for block in blocks {
        if block.get("type").and_then(Value::as_str) == Some("text") {
            if let Some(text) = block.get("text").and_then(Value::as_str) {
                content.push_str(text);
            }
        }
    }

    Ok(LlmResponse {
        content,
        model: body
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string(),
        provider: "anthropic",
        usage: parse_usage(body.get("usage"), "input_tokens", "output_tokens"),
    })
}

fn parse_usage(usage: Option<&Value>, prompt_key: &str, completion_key: &str) -> TokenUsage {
    let get = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    TokenUsage {
        prompt_tokens: get(prompt_key),
        completion_tokens: get(completion_key),
    }
}
