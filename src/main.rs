use std::sync::Arc;

use anyhow::anyhow;
use studio_live::audio;
use studio_live::config::Config;
use studio_live::controller::{LiveSessionManager, LiveStatus};
use studio_live::credentials::PromptKeySelector;
use studio_live::net_link::WsConnector;
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置
    let config = Config::new().map_err(|e| anyhow!(e))?;
    println!(
        "{} {} | model={} voice={}",
        env!("APP_NAME"),
        env!("APP_VERSION"),
        config.model,
        config.voice
    );

    let backend = audio::default_backend(&config);
    let manager = LiveSessionManager::new(
        config,
        backend,
        Arc::new(WsConnector),
        Some(Arc::new(PromptKeySelector::new())),
    );

    // 状态回调在音频/网络任务里触发，转发到主循环打印
    let (status_tx, mut status_rx) = mpsc::unbounded_channel::<LiveStatus>();
    manager
        .start(move |status| {
            let _ = status_tx.send(status);
        })
        .await;

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            status = status_rx.recv() => {
                match status {
                    Some(status) => {
                        println!("Live status: {:?}", status);
                        if matches!(status, LiveStatus::Error | LiveStatus::Disconnected) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    manager.stop().await;
    Ok(())
}
