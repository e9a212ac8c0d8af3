use crate::config::schema::AppConfig;
use crate::error::{Result, TaskTapeError};

/// Validate a whole configuration before it is used
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.api.enabled && config.api.port == 0 {
        return Err(TaskTapeError::Validation(
            "API port cannot be 0 while the API is enabled".to_string(),
        ));
    }

    if let Some(key) = &config.api.api_key {
        if key.trim().is_empty() {
            return Err(TaskTapeError::Validation(
                "API key cannot be blank; omit it to disable authentication".to_string(),
            ));
        }
    }

    validate_base_url("openrouter.base_url", &config.openrouter.base_url)?;
    validate_base_url("huggingface.base_url", &config.huggingface.base_url)?;

    if config.openrouter.model.trim().is_empty() {
        return Err(TaskTapeError::Validation(
            "openrouter.model cannot be empty".to_string(),
        ));
    }

    if let Some(repo) = &config.huggingface.dataset_repo {
        validate_repo_id(repo)?;
    }

    Ok(())
}

/// Validate an http(s) base URL
pub fn validate_base_url(field: &str, url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(TaskTapeError::Validation(format!(
            "Invalid {}: {}. Must start with http:// or https://",
            field, url
        )));
    }
    Ok(())
}

/// Validate a dataset repository id of the form `owner/name`
pub fn validate_repo_id(repo: &str) -> Result<()> {
    let mut parts = repo.split('/');
    let valid = match (parts.next(), parts.next(), parts.next()) {
        (Some(owner), Some(name), None) => [owner, name].iter().all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        }),
        _ => false,
    };

    if !valid {
        return Err(TaskTapeError::Validation(format!(
            "Invalid dataset repo id: {}. Expected owner/name",
            repo
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_repo_id() {
        assert!(validate_repo_id("alice/web-tasks").is_ok());
        assert!(validate_repo_id("org_1/data.v2").is_ok());
        assert!(validate_repo_id("web-tasks").is_err());
        assert!(validate_repo_id("alice/").is_err());
        assert!(validate_repo_id("a/b/c").is_err());
        assert!(validate_repo_id("alice/web tasks").is_err());
    }

    #[test]
    fn test_validate_config_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.api.port = 0;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.openrouter.base_url = "openrouter.ai".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.huggingface.dataset_repo = Some("no-owner".to_string());
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.api.api_key = Some("  ".to_string());
        assert!(validate_config(&config).is_err());
    }
}
