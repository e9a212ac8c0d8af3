//! Upload of recorded sequences to a dataset repository via the hub commit API.

use crate::config::HuggingFaceConfig;
use crate::recording::schema::RecordingSequence;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;

/// Outcome of an upload. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_url: Option<String>,
}

impl UploadResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            commit_url: None,
        }
    }
}

/// Path of a sequence inside the dataset repository.
pub fn dataset_path(sequence: &RecordingSequence) -> String {
    format!("data/{}.json", sequence.id)
}

/// NDJSON body for a single-file commit.
pub fn commit_body(sequence: &RecordingSequence) -> serde_json::Result<String> {
    let content = serde_json::to_vec_pretty(sequence)?;
    let header = serde_json::json!({
        "key": "header",
        "value": {
            "summary": format!("Add recording {}", sequence.id),
            "description": format!(
                "{} ({} actions)",
                sequence.task_description,
                sequence.actions.len()
            )
        }
    });
    let file = serde_json::json!({
        "key": "file",
        "value": {
            "path": dataset_path(sequence),
            "content": base64::engine::general_purpose::STANDARD.encode(content),
            "encoding": "base64"
        }
    });
    Ok(format!("{}\n{}\n", header, file))
}

pub struct DatasetUploader {
    client: Client,
    base_url: String,
}

impl DatasetUploader {
    pub fn new(config: &HuggingFaceConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Commit one sequence as `data/{id}.json`. Single attempt.
    pub async fn upload_sequence(
        &self,
        sequence: &RecordingSequence,
        api_key: &str,
        repo_id: &str,
    ) -> UploadResult {
        let body = match commit_body(sequence) {
            Ok(body) => body,
            Err(e) => return UploadResult::failed(format!("Failed to encode sequence: {}", e)),
        };
        let url = format!("{}/api/datasets/{}/commit/main", self.base_url, repo_id);

        let response = match self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Upload of {} failed: {}", sequence.id, e);
                return UploadResult::failed(format!("Request failed: {}", e));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("Upload of {} rejected: HTTP {}", sequence.id, status);
            return UploadResult::failed(format!("Upload rejected ({}): {}", status, error_text));
        }

        let commit_url = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|json| json["commitUrl"].as_str().map(str::to_string));

        tracing::info!("Uploaded sequence {} to {}", sequence.id, repo_id);
        UploadResult {
            success: true,
            message: format!("Uploaded {} to {}", dataset_path(sequence), repo_id),
            commit_url,
        }
    }
}
