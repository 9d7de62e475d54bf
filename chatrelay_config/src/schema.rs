use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatrelay_core::{CompletionParams, SenderLimits};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub agents: AgentsConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AgentDefaults {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    #[serde(default = "AgentDefaults::default_top_p")]
    pub top_p: f64,
    #[serde(default = "AgentDefaults::default_frequency_penalty")]
    pub frequency_penalty: f64,
    #[serde(default = "AgentDefaults::default_presence_penalty")]
    pub presence_penalty: f64,
    /// Template with `{user}` and `{today}` placeholders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Read at startup; wins over `system_prompt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goodbye_message: Option<String>,
    #[serde(default = "AgentDefaults::default_expire_secs")]
    pub conversation_expire_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_models: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub caption_images: bool,
    #[serde(default = "default_true")]
    pub voice_transcription: bool,
    #[serde(default = "default_true")]
    pub allow_images: bool,
}

const fn default_true() -> bool {
    true
}

impl AgentDefaults {
    const fn default_top_p() -> f64 {
        1.0
    }

    const fn default_frequency_penalty() -> f64 {
        0.3
    }

    const fn default_presence_penalty() -> f64 {
        0.1
    }

    const fn default_expire_secs() -> u64 {
        3 * 60 * 60
    }

    #[must_use]
    pub fn completion_params(&self) -> CompletionParams {
        CompletionParams {
            model: self.model.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            max_tokens: self.max_tokens,
            ..CompletionParams::default()
        }
    }

    #[must_use]
    pub const fn conversation_expiry(&self) -> Duration {
        Duration::from_secs(self.conversation_expire_secs)
    }

    /// The system prompt template: the file's contents when a file is
    /// configured, otherwise the inline template.
    pub fn resolve_system_prompt(&self) -> anyhow::Result<Option<String>> {
        match &self.system_prompt_file {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("Cannot read system prompt file {}: {e}", path.display())
                })?;
                Ok(Some(content.trim().to_string()))
            }
            None => Ok(self.system_prompt.clone()),
        }
    }
}

/// Defaults for senders without a contact entry.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LimitsConfig {
    /// `null` means unbounded.
    #[serde(default)]
    pub max_messages: Option<u32>,
    #[serde(default = "LimitsConfig::default_max_image_generations")]
    pub max_image_generations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_messages: None,
            max_image_generations: Self::default_max_image_generations(),
        }
    }
}

impl LimitsConfig {
    const fn default_max_image_generations() -> u32 {
        3
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub openai: OpenAiConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assemblyai: Option<AssemblyAiConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "OpenAiConfig::default_base_url")]
    pub base_url: String,
}

impl OpenAiConfig {
    fn default_base_url() -> String {
        "https://api.openai.com/v1".to_string()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AssemblyAiConfig {
    pub api_key: String,
    #[serde(default = "AssemblyAiConfig::default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

impl AssemblyAiConfig {
    const fn default_poll_timeout_secs() -> u64 {
        30
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "WhatsAppConfig::default_listen")]
    pub listen: String,
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default)]
    pub from_number: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contacts_path: Option<PathBuf>,
    /// Compare sender ids without the `whatsapp:` prefix.
    #[serde(default = "default_true")]
    pub strip_transport_scheme: bool,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: Self::default_listen(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: String::new(),
            allow_from: Vec::new(),
            contacts_path: None,
            strip_transport_scheme: true,
        }
    }
}

impl WhatsAppConfig {
    fn default_listen() -> String {
        "0.0.0.0:8080".to_string()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub allow_from: Vec<String>,
}

/// Show only the first and last four characters of a secret.
#[must_use]
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

const CONFIG_TEMPLATE: &str = r#"{
  "agents": {
    "defaults": {
      "model": "gpt-3.5-turbo",
      "max_tokens": 1000,
      "temperature": 1.2,
      "top_p": 1.0,
      "frequency_penalty": 0.3,
      "presence_penalty": 0.1,
      "system_prompt": "You are a helpful and friendly assistant chatting with {user} over WhatsApp. Today is {today}. When the user asks for a picture, end your reply with [img: \"<image description>\"].",
      "goodbye_message": "Goodbye {user}! I'll be here if you need me.",
      "conversation_expire_secs": 10800,
      "caption_images": true,
      "voice_transcription": true,
      "allow_images": true
    }
  },
  "limits": {
    "max_messages": null,
    "max_image_generations": 3
  },
  "providers": {
    "openai": {
      "api_key": "your-openai-api-key-here",
      "base_url": "https://api.openai.com/v1"
    },
    "assemblyai": {
      "api_key": "your-assemblyai-api-key-here",
      "poll_timeout_secs": 30
    }
  },
  "whatsapp": {
    "enabled": true,
    "listen": "0.0.0.0:8080",
    "account_sid": "your-twilio-account-sid",
    "auth_token": "your-twilio-auth-token",
    "from_number": "+14155238886",
    "allow_from": [],
    "strip_transport_scheme": true
  },
  "telegram": {
    "enabled": false,
    "token": "",
    "allow_from": []
  }
}"#;

impl Config {
    /// `~/chatrelay`
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?
            .join("chatrelay"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");

        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found at: {}. Please run 'chatrelay init' to create config.",
                config_path.display()
            );
        }
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config file {}: {e}", path.display()))?;
        Ok(config)
    }

    #[must_use]
    pub fn sender_limits(&self) -> SenderLimits {
        SenderLimits {
            max_messages: self.limits.max_messages,
            max_image_generations: self.limits.max_image_generations,
            voice_transcription: self.agents.defaults.voice_transcription,
            transcription_language: None,
        }
    }

    pub fn ensure_config_dir() -> anyhow::Result<PathBuf> {
        let config_dir = Self::config_dir()?;
        std::fs::create_dir_all(&config_dir)?;
        Ok(config_dir)
    }

    pub fn create_config() -> anyhow::Result<PathBuf> {
        let config_dir = Self::ensure_config_dir()?;
        Self::create_config_in(&config_dir)
    }

    /// Write the template to `<dir>/config.json`, refusing to overwrite.
    pub fn create_config_in(dir: &Path) -> anyhow::Result<PathBuf> {
        let config_path = dir.join("config.json");

        if config_path.exists() {
            anyhow::bail!(
                "Config file already exists at: {}. Please edit it directly.",
                config_path.display()
            );
        }

        std::fs::write(&config_path, CONFIG_TEMPLATE)?;
        Ok(config_path)
    }
}
