use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_API_PORT: u16 = 38472;
pub const DEFAULT_CDP_PORT: u16 = 9222;
pub const DEFAULT_OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_OPENROUTER_MODEL: &str = "deepseek/deepseek-r1-0528:free";
pub const DEFAULT_HUGGINGFACE_URL: &str = "https://huggingface.co";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding recording state and sequences
    #[serde(default = "crate::recording::store::default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Local HTTP bridge
    #[serde(default)]
    pub api: ApiConfig,

    /// Task generation
    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    /// Dataset upload
    #[serde(default)]
    pub huggingface: HuggingFaceConfig,

    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_dir: crate::recording::store::default_storage_dir(),
            api: ApiConfig::default(),
            openrouter: OpenRouterConfig::default(),
            huggingface: HuggingFaceConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Required in the X-API-Key header when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: DEFAULT_API_PORT,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_openrouter_model")]
    pub model: String,

    #[serde(default = "default_openrouter_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_openrouter_model(),
            base_url: default_openrouter_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HuggingFaceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Dataset repository id (`owner/name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_repo: Option<String>,

    #[serde(default = "default_huggingface_url")]
    pub base_url: String,
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            dataset_repo: None,
            base_url: default_huggingface_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Remote debugging port of the Chrome to attach to; 0 disables attaching
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            cdp_port: DEFAULT_CDP_PORT,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_cdp_port() -> u16 {
    DEFAULT_CDP_PORT
}

fn default_openrouter_model() -> String {
    DEFAULT_OPENROUTER_MODEL.to_string()
}

fn default_openrouter_url() -> String {
    DEFAULT_OPENROUTER_URL.to_string()
}

fn default_huggingface_url() -> String {
    DEFAULT_HUGGINGFACE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
storage_dir = "/tmp/tasktape"

[huggingface]
api_key = "hf_test"
dataset_repo = "alice/web-tasks"
"#,
        )
        .unwrap();

        assert_eq!(config.storage_dir, PathBuf::from("/tmp/tasktape"));
        assert_eq!(config.huggingface.dataset_repo.as_deref(), Some("alice/web-tasks"));
        assert_eq!(config.huggingface.base_url, DEFAULT_HUGGINGFACE_URL);
        assert_eq!(config.openrouter.model, DEFAULT_OPENROUTER_MODEL);
        assert!(config.api.enabled);
        assert_eq!(config.api.port, DEFAULT_API_PORT);
        assert_eq!(config.browser.cdp_port, DEFAULT_CDP_PORT);
    }

    #[test]
    fn test_config_toml_round_trip() {
        let mut config = AppConfig::default();
        config.api.api_key = Some("secret".to_string());
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
