//! Task generation through an OpenAI-compatible chat completion endpoint.

use crate::config::OpenRouterConfig;
use crate::error::{Result, TaskTapeError};
use crate::recording::schema::{Task, TaskSource};
use reqwest::Client;

const SYSTEM_PROMPT: &str = "You write short, concrete tasks that a person can complete in a web \
browser in under two minutes, such as searching a site, filling a form, or changing a setting. \
Reply with the task only: one sentence, no numbering, no explanation.";

const USER_PROMPT: &str = "Give me one new browser task.";

pub struct TaskGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl TaskGenerator {
    pub fn new(config: &OpenRouterConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Ask the model for one task. Single attempt; failures surface as `Transport`.
    pub async fn generate_task(&self, api_key: &str) -> Result<Task> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": USER_PROMPT }
            ],
            "max_tokens": 1024,
            "temperature": 0.9
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| TaskTapeError::Transport(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TaskTapeError::Transport(format!(
                "OpenRouter API error ({}): {}",
                status, error_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TaskTapeError::Transport(format!("Failed to parse response: {}", e)))?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        let description = clean_task_text(content);
        if description.is_empty() {
            return Err(TaskTapeError::Transport(
                "Model returned an empty task".to_string(),
            ));
        }

        tracing::info!("Generated task with {}: {}", self.model, description);
        Ok(Task::new(description, TaskSource::Llm))
    }
}

/// Strip reasoning blocks, labels and wrapping quotes from a model reply.
pub fn clean_task_text(raw: &str) -> String {
    let mut text = raw.to_string();
    while let Some(start) = text.find("<think>") {
        match text[start..].find("</think>") {
            Some(end) => text.replace_range(start..start + end + "</think>".len(), ""),
            None => text.truncate(start),
        }
    }

    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    let line = line.strip_prefix("Task:").unwrap_or(line).trim();
    line.trim_matches(|c| matches!(c, '"' | '\'' | '`' | '*'))
        .trim()
        .to_string()
}
