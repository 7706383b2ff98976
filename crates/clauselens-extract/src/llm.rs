//! Ollama client for extraction prompts.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use clauselens_core::{Error, Result};

static JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for Ollama's `/api/generate` endpoint.
pub struct LlmClient {
    client: reqwest::Client,
    generate_url: String,
    model: String,
    timeout: Duration,
}

impl LlmClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            generate_url: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.to_string(),
            timeout,
        }
    }

    /// Run an extraction prompt in JSON mode and parse the result.
    ///
    /// Low temperature keeps extraction output stable across runs. Models
    /// sometimes wrap their JSON in prose despite `format: json`, so the
    /// parse falls back to the first JSON-looking span in the response.
    pub async fn generate_json(&self, prompt: &str) -> Result<Value> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "temperature": 0.1, "num_predict": 2048 },
        });

        let text = self.generate(&body).await?;
        recover_json(&text)
            .ok_or_else(|| Error::Extraction("model response contained no JSON".into()))
    }

    async fn generate(&self, body: &Value) -> Result<String> {
        let response = self
            .client
            .post(&self.generate_url)
            .timeout(self.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Extraction(format!("model request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Extraction(format!(
                "model returned {}",
                response.status()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::Extraction(format!("malformed model response: {}", e)))?;
        Ok(parsed.response)
    }
}

/// Parse model output as JSON, tolerating surrounding prose.
pub fn recover_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }

    for pattern in [&*JSON_ARRAY, &*JSON_OBJECT] {
        if let Some(m) = pattern.find(text) {
            match serde_json::from_str(m.as_str()) {
                Ok(value) => return Some(value),
                Err(e) => warn!("JSON recovery failed: {}", e),
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_clean_json() {
        let value = recover_json(r#"[{"clause_type": "termination"}]"#).unwrap();
        assert!(value.is_array());
    }

    #[test]
    fn test_recover_json_wrapped_in_prose() {
        let text = "Here are the clauses I found:\n[{\"clause_type\": \"warranty\"}]\nLet me know!";
        let value = recover_json(text).unwrap();
        assert_eq!(value[0]["clause_type"], "warranty");
    }

    #[test]
    fn test_recover_object_wrapped_in_prose() {
        let text = "Sure: {\"entities\": [], \"relationships\": []} done.";
        let value = recover_json(text).unwrap();
        assert!(value["entities"].is_array());
    }

    #[test]
    fn test_recover_no_json() {
        assert!(recover_json("I could not find any clauses.").is_none());
    }
}
