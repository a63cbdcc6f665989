use serde::{Deserialize, Serialize};

use crate::credentials::{KEY_FILE_PATH, read_key_file};
use crate::retry::RetryPolicy;

/// Environment variables checked (in order) for the API credential.
const API_KEY_VARS: [&str; 2] = ["STUDIO_API_KEY", "GEMINI_API_KEY"];

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    // 实时会话配置
    pub ws_url: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub outbound_queue: usize,

    // 凭证（运行时从环境变量读取，不编译进二进制）
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    // 音频设备配置
    pub capture_device: String,
    pub playback_device: String,
    pub playback_sample_rate: u32,
    pub playback_channels: u16,
    pub playback_period_size: usize,

    // 重试策略
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    // 图片视口配置
    pub min_crop_size: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub zoom_sensitivity: f64,
    pub jpeg_quality: u8,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有默认值都在编译时从 config.toml 中读取，运行时环境变量可以覆盖部分字段
    pub fn new() -> Result<Self, &'static str> {
        let mut config = Self {
            ws_url: env!("LIVE_WS_URL").to_string(),
            model: env!("LIVE_MODEL").to_string(),
            voice: env!("LIVE_VOICE").to_string(),
            system_instruction: env!("LIVE_SYSTEM_INSTRUCTION").to_string(),
            input_sample_rate: env!("LIVE_INPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse LIVE_INPUT_SAMPLE_RATE")?,
            output_sample_rate: env!("LIVE_OUTPUT_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse LIVE_OUTPUT_SAMPLE_RATE")?,
            frame_size: env!("LIVE_FRAME_SIZE").parse()
                .map_err(|_| "Failed to parse LIVE_FRAME_SIZE")?,
            outbound_queue: env!("LIVE_OUTBOUND_QUEUE").parse()
                .map_err(|_| "Failed to parse LIVE_OUTBOUND_QUEUE")?,

            api_key: None,

            capture_device: env!("AUDIO_CAPTURE_DEVICE").to_string(),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE").to_string(),
            playback_sample_rate: env!("AUDIO_PLAYBACK_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_SAMPLE_RATE")?,
            playback_channels: env!("AUDIO_PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_CHANNELS")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,

            retry_max_attempts: env!("RETRY_MAX_ATTEMPTS").parse()
                .map_err(|_| "Failed to parse RETRY_MAX_ATTEMPTS")?,
            retry_base_delay_ms: env!("RETRY_BASE_DELAY_MS").parse()
                .map_err(|_| "Failed to parse RETRY_BASE_DELAY_MS")?,
            retry_max_delay_ms: env!("RETRY_MAX_DELAY_MS").parse()
                .map_err(|_| "Failed to parse RETRY_MAX_DELAY_MS")?,

            min_crop_size: env!("VIEWPORT_MIN_CROP_SIZE").parse()
                .map_err(|_| "Failed to parse VIEWPORT_MIN_CROP_SIZE")?,
            min_zoom: env!("VIEWPORT_MIN_ZOOM").parse()
                .map_err(|_| "Failed to parse VIEWPORT_MIN_ZOOM")?,
            max_zoom: env!("VIEWPORT_MAX_ZOOM").parse()
                .map_err(|_| "Failed to parse VIEWPORT_MAX_ZOOM")?,
            zoom_sensitivity: env!("VIEWPORT_ZOOM_SENSITIVITY").parse()
                .map_err(|_| "Failed to parse VIEWPORT_ZOOM_SENSITIVITY")?,
            jpeg_quality: env!("VIEWPORT_JPEG_QUALITY").parse()
                .map_err(|_| "Failed to parse VIEWPORT_JPEG_QUALITY")?,
        };

        config.apply_env_overrides();
        config.refresh_credentials();
        Ok(config)
    }

    /// Re-read the API credential from the environment, then from the local
    /// key file.
    ///
    /// Called by the session manager right before every connect so a key
    /// picked through the key-selection host is seen without rebuilding any
    /// client. Returns `true` when a credential is present afterwards.
    pub fn refresh_credentials(&mut self) -> bool {
        let fresh = env_api_key().or_else(|| read_key_file(KEY_FILE_PATH));

        if fresh.is_some() && fresh != self.api_key {
            log::debug!("API credential refreshed");
        }
        if fresh.is_some() {
            self.api_key = fresh;
        }
        self.api_key.is_some()
    }

    /// Retry policy for remote calls, built from the `[retry]` section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_max_attempts,
            std::time::Duration::from_millis(self.retry_base_delay_ms),
            std::time::Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("STUDIO_WS_URL") {
            self.ws_url = url;
        }
        if let Ok(voice) = std::env::var("STUDIO_VOICE") {
            self.voice = voice;
        }
    }
}

/// API key from the first non-empty credential variable.
pub fn env_api_key() -> Option<String> {
    api_key_from(|name| std::env::var(name).ok())
}

fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_VARS.iter().find_map(|name| {
        lookup(*name)
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    })
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_defaults_are_parsed() {
        let config = Config::new().unwrap();
        assert_eq!(config.input_sample_rate, 16000);
        assert_eq!(config.output_sample_rate, 24000);
        assert_eq!(config.frame_size, 4096);
        assert_eq!(config.min_crop_size, 40.0);
        assert!(config.min_zoom < config.max_zoom);
    }

    #[test]
    fn explicit_key_survives_refresh_without_env() {
        let mut config = Config::new().unwrap();
        config.api_key = Some("explicit".into());
        // Either the env provides a key or the explicit one is kept.
        assert!(config.refresh_credentials());
        assert!(config.api_key.is_some());
    }

    #[test]
    fn blank_key_variable_falls_through_to_the_next() {
        let lookup = |name: &str| match name {
            "STUDIO_API_KEY" => Some("  ".to_string()),
            "GEMINI_API_KEY" => Some(" gemini-key\n".to_string()),
            _ => None,
        };
        assert_eq!(api_key_from(lookup), Some("gemini-key".to_string()));
        assert_eq!(api_key_from(|_| Some(String::new())), None);
    }
}
