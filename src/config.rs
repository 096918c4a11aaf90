use secrecy::{ExposeSecret, SecretBox};
use serde::Serialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Realtime endpoint of the conversational service
pub const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
pub const REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2025-06-03";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Credentials for the realtime service
#[derive(Debug)]
pub struct ApiConfig {
    pub openai_key: SecretBox<String>,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok();

        // OPENAI_KEY is the name older setups used
        let env_var = if env::var("OPENAI_API_KEY").is_ok() {
            "OPENAI_API_KEY"
        } else if env::var("OPENAI_KEY").is_ok() {
            "OPENAI_KEY"
        } else {
            return Err(ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()));
        };

        let openai_key = Self::load_api_key(env_var, "OpenAI")?;
        Ok(Self { openai_key })
    }

    /// Load and validate a single API key from environment
    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service_name.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }

        Self::validate_key_format(key.trim(), service_name)?;

        Ok(SecretBox::new(Box::new(key.trim().to_string())))
    }

    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        if service == "OpenAI" && !key.starts_with("sk-") {
            return Err(ConfigError::InvalidKeyFormat {
                service: service.to_string(),
                reason: "OpenAI keys should start with 'sk-'".to_string(),
            });
        }
        Ok(())
    }

    /// Get the OpenAI API key (use only when opening a connection)
    pub fn openai_key(&self) -> &str {
        self.openai_key.expose_secret()
    }
}

/// Load configuration with helpful error messages for development
pub fn load_config() -> Result<ApiConfig, ConfigError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var))
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Session parameters sent once in the `session.update` handshake
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
    pub temperature: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: "You are a good friend and a helpful assistant.".to_string(),
            voice: "ash".to_string(),
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
            },
            temperature: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Microphone sample rate requested from the input device
    pub capture_rate: u32,
    /// Sample rate negotiated with the realtime service
    pub transport_rate: u32,
    /// Frames read from the input device per capture iteration
    pub capture_block: usize,
    /// Output device callback period
    pub playback_period: Duration,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub ack_beep: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_rate: 48_000,
            transport_rate: 24_000,
            capture_block: 1024,
            playback_period: Duration::from_millis(50),
            input_device: None,
            output_device: None,
            ack_beep: true,
        }
    }
}

impl AudioConfig {
    /// Duration of one capture block at the capture rate
    pub fn capture_period(&self) -> Duration {
        Duration::from_secs_f64(self.capture_block as f64 / self.capture_rate as f64)
    }

    /// Frames per output callback at the given device rate
    pub fn playback_frames(&self, output_rate: u32) -> usize {
        (self.playback_period.as_secs_f64() * output_rate as f64).round() as usize
    }
}

#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Session ends when no response completes within this window
    pub inactivity_timeout: Duration,
    pub interrupt_poll: Duration,
    pub drain_poll: Duration,
    /// Sleep between capture polls while the device has too few frames
    pub capture_poll: Duration,
    /// Ignore repeated wake detections within this window
    pub wake_cooldown: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(10),
            interrupt_poll: Duration::from_millis(100),
            drain_poll: Duration::from_millis(100),
            capture_poll: Duration::from_millis(5),
            wake_cooldown: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeEndpoint {
    pub url: String,
    pub model: String,
}

impl Default for RealtimeEndpoint {
    fn default() -> Self {
        Self {
            url: REALTIME_URL.to_string(),
            model: REALTIME_MODEL.to_string(),
        }
    }
}

/// Everything a session needs besides credentials
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub audio: AudioConfig,
    pub timing: TimingConfig,
    pub endpoint: RealtimeEndpoint,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audio.capture_rate == 0 || self.audio.transport_rate == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sample rate".to_string(),
                reason: "sample rates must be non-zero".to_string(),
            });
        }
        if self.audio.capture_block == 0 {
            return Err(ConfigError::InvalidValue {
                field: "capture_block".to_string(),
                reason: "capture block must hold at least one frame".to_string(),
            });
        }
        if self.timing.inactivity_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "inactivity_timeout".to_string(),
                reason: "timeout must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_key_validation() {
        assert!(ApiConfig::validate_key_format("sk-test123", "OpenAI").is_ok());
        assert!(ApiConfig::validate_key_format("invalid", "OpenAI").is_err());
    }

    #[test]
    #[serial]
    fn test_load_prefers_openai_api_key() {
        env::set_var("OPENAI_API_KEY", "sk-primary");
        env::set_var("OPENAI_KEY", "sk-legacy");
        let config = ApiConfig::load().unwrap();
        assert_eq!(config.openai_key(), "sk-primary");
        env::remove_var("OPENAI_API_KEY");
        env::remove_var("OPENAI_KEY");
    }

    #[test]
    #[serial]
    fn test_load_falls_back_to_legacy_key() {
        env::remove_var("OPENAI_API_KEY");
        env::set_var("OPENAI_KEY", "  sk-legacy  ");
        let config = ApiConfig::load().unwrap();
        assert_eq!(config.openai_key(), "sk-legacy");
        env::remove_var("OPENAI_KEY");
    }

    #[test]
    fn test_session_config_serializes_handshake_shape() {
        let value = serde_json::to_value(SessionConfig::default()).unwrap();
        assert_eq!(value["voice"], "ash");
        assert_eq!(value["turn_detection"]["type"], "server_vad");
        assert_eq!(value["modalities"][0], "audio");
        assert_eq!(value["input_audio_format"], "pcm16");
    }

    #[test]
    fn test_audio_periods() {
        let audio = AudioConfig::default();
        assert_eq!(audio.playback_frames(24_000), 1200);
        let period = audio.capture_period();
        assert!((period.as_secs_f64() - 1024.0 / 48_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());
        config.timing.inactivity_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
