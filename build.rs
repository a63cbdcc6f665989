use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    live: Live,
    audio: Audio,
    retry: Retry,
    viewport: Viewport,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Live {
    ws_url: String,
    model: String,
    voice: String,
    system_instruction: String,
    input_sample_rate: u32,
    output_sample_rate: u32,
    frame_size: usize,
    outbound_queue: usize,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    playback_sample_rate: u32,
    playback_channels: u16,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Retry {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

#[derive(Deserialize)]
struct Viewport {
    min_crop_size: f64,
    min_zoom: f64,
    max_zoom: f64,
    zoom_sensitivity: f64,
    jpeg_quality: u8,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 实时会话配置
    println!("cargo:rustc-env=LIVE_WS_URL={}", config.live.ws_url);
    println!("cargo:rustc-env=LIVE_MODEL={}", config.live.model);
    println!("cargo:rustc-env=LIVE_VOICE={}", config.live.voice);
    println!("cargo:rustc-env=LIVE_SYSTEM_INSTRUCTION={}", config.live.system_instruction);
    println!("cargo:rustc-env=LIVE_INPUT_SAMPLE_RATE={}", config.live.input_sample_rate);
    println!("cargo:rustc-env=LIVE_OUTPUT_SAMPLE_RATE={}", config.live.output_sample_rate);
    println!("cargo:rustc-env=LIVE_FRAME_SIZE={}", config.live.frame_size);
    println!("cargo:rustc-env=LIVE_OUTBOUND_QUEUE={}", config.live.outbound_queue);

    // 音频设备配置
    println!("cargo:rustc-env=AUDIO_CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_SAMPLE_RATE={}", config.audio.playback_sample_rate);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_CHANNELS={}", config.audio.playback_channels);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);

    // 重试策略
    println!("cargo:rustc-env=RETRY_MAX_ATTEMPTS={}", config.retry.max_attempts);
    println!("cargo:rustc-env=RETRY_BASE_DELAY_MS={}", config.retry.base_delay_ms);
    println!("cargo:rustc-env=RETRY_MAX_DELAY_MS={}", config.retry.max_delay_ms);

    // 图片视口配置
    println!("cargo:rustc-env=VIEWPORT_MIN_CROP_SIZE={}", config.viewport.min_crop_size);
    println!("cargo:rustc-env=VIEWPORT_MIN_ZOOM={}", config.viewport.min_zoom);
    println!("cargo:rustc-env=VIEWPORT_MAX_ZOOM={}", config.viewport.max_zoom);
    println!("cargo:rustc-env=VIEWPORT_ZOOM_SENSITIVITY={}", config.viewport.zoom_sensitivity);
    println!("cargo:rustc-env=VIEWPORT_JPEG_QUALITY={}", config.viewport.jpeg_quality);
}
