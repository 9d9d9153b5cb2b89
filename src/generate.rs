//! Shader generation through an OpenAI-compatible chat completions endpoint.

use crate::detect::{pending, Pending};
use crate::error::GenerateError;
use crate::shader::GLSL_INTERFACE;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One natural-language request, optionally refining the shader currently on screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub instruction: String,
    pub current_shader: Option<String>,
}

/// Produces fragment shader text from an instruction.
pub trait ShaderGenerator {
    fn generate(&mut self, request: GenerationRequest) -> Pending<Result<String, GenerateError>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token. Empty disables authentication.
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
            system_prompt: None,
        }
    }
}

fn default_system_prompt() -> String {
    format!(
        "You write GLSL 450 fragment shaders for a live webcam effect.\n\
         Reply with exactly one complete shader inside a ```glsl code block.\n\
         The shader must start with these declarations, unchanged:\n\n{}\n\
         Sample the camera with texture(sampler2D(u_video, u_sampler), v_uv).\n\
         u_boxes[i] holds detected objects as (x, y, width, height) in source pixels with a top-left origin; \
         v_uv * u_source_size is the current pixel position. Only the first u_count entries are valid.",
        GLSL_INTERFACE
    )
}

/// Build the chat messages for a request.
pub fn build_messages(request: &GenerationRequest, system_prompt: Option<&str>) -> Value {
    let system = system_prompt
        .map(str::to_string)
        .unwrap_or_else(default_system_prompt);
    let user = match &request.current_shader {
        Some(current) => format!(
            "Current shader:\n```glsl\n{}\n```\n\nModify it: {}",
            current.trim_end(),
            request.instruction
        ),
        None => request.instruction.clone(),
    };
    json!([
        { "role": "system", "content": system },
        { "role": "user", "content": user },
    ])
}

/// Pull the assistant message out of a chat completions response body.
pub fn parse_completion(body: &str) -> Result<String, GenerateError> {
    let value: Value = serde_json::from_str(body).map_err(|e| GenerateError::Malformed(e.to_string()))?;
    value["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GenerateError::Malformed("no choices[0].message.content".to_string()))
}

/// The shader text inside the first fenced code block, or the whole reply trimmed.
pub fn extract_shader_source(text: &str) -> String {
    let Some(start) = text.find("```") else {
        return text.trim().to_string();
    };
    let after_fence = &text[start + 3..];
    // The rest of the opening line is the language tag.
    let body = match after_fence.find('\n') {
        Some(newline) => &after_fence[newline + 1..],
        None => return text.trim().to_string(),
    };
    let code = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    code.trim().to_string()
}

/// Sends requests from a worker thread per call.
pub struct HttpShaderGenerator {
    config: GeneratorConfig,
}

impl HttpShaderGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn api_key(&self) -> Result<Option<String>, GenerateError> {
        if self.config.api_key_env.is_empty() {
            return Ok(None);
        }
        match std::env::var(&self.config.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(Some(key)),
            _ => Err(GenerateError::MissingApiKey(self.config.api_key_env.clone())),
        }
    }
}

impl ShaderGenerator for HttpShaderGenerator {
    fn generate(&mut self, request: GenerationRequest) -> Pending<Result<String, GenerateError>> {
        let api_key = match self.api_key() {
            Ok(key) => key,
            Err(e) => return Pending::ready(Err(e)),
        };

        let (resolver, reply) = pending();
        let config = self.config.clone();
        let spawned = std::thread::Builder::new()
            .name("prism-generate".into())
            .spawn(move || {
                let started = Instant::now();
                let result = request_completion(&config, api_key.as_deref(), &request)
                    .map(|text| extract_shader_source(&text));
                info!("Shader generation finished in {:?}", started.elapsed());
                resolver.resolve(result);
            });

        match spawned {
            Ok(_) => reply,
            Err(e) => Pending::ready(Err(GenerateError::Transport(e.to_string()))),
        }
    }
}

fn request_completion(
    config: &GeneratorConfig,
    api_key: Option<&str>,
    request: &GenerationRequest,
) -> Result<String, GenerateError> {
    let body = json!({
        "model": config.model,
        "messages": build_messages(request, config.system_prompt.as_deref()),
    });
    debug!("Posting generation request to {}", config.endpoint);

    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build();
    let mut call = agent
        .post(&config.endpoint)
        .set("Content-Type", "application/json");
    if let Some(key) = api_key {
        call = call.set("Authorization", &format!("Bearer {}", key));
    }

    match call.send_string(&body.to_string()) {
        Ok(response) => {
            let text = response
                .into_string()
                .map_err(|e| GenerateError::Transport(e.to_string()))?;
            parse_completion(&text)
        }
        Err(ureq::Error::Status(status, response)) => Err(GenerateError::Status {
            status,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(e) => Err(GenerateError::Transport(e.to_string())),
    }
}
