#![forbid(unsafe_code)]

//! Local Ollama connector used as the reasoning oracle.
//!
//! Every failure is reported in-band through `OracleReply`; nothing here
//! returns an error to the caller once the client is built.

use std::env;
use std::time::Duration;

use caleon_kernel_contracts::collaborators::{
    OraclePerformance, OracleQuery, OracleReply, ReasoningOracle,
};
use caleon_kernel_contracts::{validate_range, ContractViolation, Validate};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
    pub health_timeout_ms: u64,
    pub user_agent: String,
    pub temperature: f64,
    pub top_p: f64,
    pub num_predict: u32,
}

impl OllamaConfig {
    pub fn mvp_v1() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            model: "phi3:mini".to_string(),
            timeout_ms: 60_000,
            health_timeout_ms: 5_000,
            user_agent: "caleon-oracle/1.0".to_string(),
            temperature: 0.7,
            top_p: 0.9,
            num_predict: 256,
        }
    }

    pub fn from_env() -> Self {
        let defaults = Self::mvp_v1();
        Self {
            base_url: env::var("CALEON_OLLAMA_URL")
                .ok()
                .and_then(trim_non_empty)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            model: env::var("CALEON_OLLAMA_MODEL")
                .ok()
                .and_then(trim_non_empty)
                .unwrap_or(defaults.model),
            timeout_ms: env::var("CALEON_OLLAMA_TIMEOUT_MS")
                .ok()
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .unwrap_or(defaults.timeout_ms),
            user_agent: env::var("CALEON_HTTP_USER_AGENT")
                .ok()
                .and_then(trim_non_empty)
                .unwrap_or(defaults.user_agent),
            ..defaults
        }
    }

    pub fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    pub fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

impl Validate for OllamaConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ContractViolation::InvalidValue {
                field: "ollama_config.base_url",
                reason: "must be an http(s) url",
            });
        }
        if self.model.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "ollama_config.model",
                reason: "must not be empty",
            });
        }
        if self.timeout_ms == 0 || self.health_timeout_ms == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "ollama_config.timeout_ms",
                reason: "must be > 0",
            });
        }
        validate_range("ollama_config.temperature", self.temperature, 0.0, 2.0)?;
        validate_range("ollama_config.top_p", self.top_p, 0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    config: OllamaConfig,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    total_duration: u64,
    #[serde(default)]
    eval_count: u64,
    #[serde(default)]
    eval_duration: u64,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Result<Self, ContractViolation> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn from_env() -> Result<Self, ContractViolation> {
        Self::new(OllamaConfig::from_env())
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Entry for the configured model from `/api/tags`, if the server lists it.
    pub fn model_info(&self) -> Option<Value> {
        let agent = build_http_agent(self.config.health_timeout_ms, &self.config.user_agent);
        let response = agent.get(&self.config.tags_url()).call().ok()?;
        let tags: Value = serde_json::from_reader(response.into_reader()).ok()?;
        tags.get("models")?
            .as_array()?
            .iter()
            .find(|m| m.get("name").and_then(Value::as_str) == Some(self.config.model.as_str()))
            .cloned()
    }

    fn call_generate(&self, query: &OracleQuery) -> Result<OracleReply, String> {
        let timeout_ms = (query.timeout.as_millis() as u64)
            .min(self.config.timeout_ms)
            .max(1);
        let agent = build_http_agent(timeout_ms, &self.config.user_agent);
        let response = agent
            .post(&self.config.generate_url())
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_json(generate_payload(&self.config, query))
            .map_err(oracle_error_from_ureq)?;
        let body: GenerateResponse = serde_json::from_reader(response.into_reader())
            .map_err(|e| format!("json_parse: {e}"))?;
        Ok(OracleReply {
            success: true,
            response: body.response.trim().to_string(),
            model: body.model.unwrap_or_else(|| self.config.model.clone()),
            performance: OraclePerformance {
                total_duration: body.total_duration,
                eval_count: body.eval_count,
                eval_duration: body.eval_duration,
            },
            error: None,
        })
    }
}

impl ReasoningOracle for OllamaClient {
    fn health_check(&self) -> bool {
        let agent = build_http_agent(self.config.health_timeout_ms, &self.config.user_agent);
        match agent.get(&self.config.tags_url()).call() {
            Ok(response) => response.status() == 200,
            Err(e) => {
                log::debug!("ollama health check failed: {}", oracle_error_from_ureq(e));
                false
            }
        }
    }

    fn query(&self, query: &OracleQuery) -> OracleReply {
        match self.call_generate(query) {
            Ok(reply) => reply,
            Err(error) => {
                log::error!("ollama query failed: {error}");
                OracleReply::unavailable(self.config.model.clone(), error)
            }
        }
    }
}

fn generate_payload(config: &OllamaConfig, query: &OracleQuery) -> Value {
    let prompt = match query.context.as_ref() {
        Some(context) => format!("{}\n\nContext: {context}", query.prompt),
        None => query.prompt.clone(),
    };
    let mut payload = json!({
        "model": config.model,
        "prompt": prompt,
        "stream": false,
        "options": {
            "temperature": config.temperature,
            "top_p": config.top_p,
            "num_predict": config.num_predict,
        },
    });
    if let (Some(system), Some(obj)) = (query.system.as_ref(), payload.as_object_mut()) {
        obj.insert("system".to_string(), Value::String(system.clone()));
    }
    payload
}

fn build_http_agent(timeout_ms: u64, user_agent: &str) -> ureq::Agent {
    let timeout = Duration::from_millis(timeout_ms.max(1));
    ureq::AgentBuilder::new()
        .timeout_connect(timeout)
        .timeout_read(timeout)
        .timeout_write(timeout)
        .timeout(timeout)
        .user_agent(user_agent)
        .try_proxy_from_env(false)
        .build()
}

fn oracle_error_from_ureq(err: ureq::Error) -> String {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            format!("HTTP {status}: {}", body.trim())
        }
        ureq::Error::Transport(transport) => {
            let combined = format!("{:?} {}", transport.kind(), transport);
            format!("{}: {transport}", classify_transport_error_kind(&combined))
        }
    }
}

fn classify_transport_error_kind(raw: &str) -> &'static str {
    let lower = raw.to_ascii_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("dns") {
        "dns"
    } else if lower.contains("connection") || lower.contains("connect") {
        "connection"
    } else {
        "transport"
    }
}

fn trim_non_empty(raw: String) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
