//! 邮件服务
//!
//! 消费待发送邮件，收到 Ctrl+C 或 SIGTERM 后发送完当前邮件再退出。

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use ecommerce_shared::config::AppConfig;
use ecommerce_shared::observability;
use ecommerce_shared::signal::shutdown_signal;
use service_email::EmailSender;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "service-email")]
#[command(version, about = "邮件发送服务")]
struct Cli {
    /// 单封邮件的模拟发送耗时（毫秒）
    #[arg(long, default_value = "1000")]
    send_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load("service-email")?;
    observability::init(&config.service_name, &config.observability)?;
    info!(
        brokers = %config.kafka.brokers,
        environment = %config.environment,
        "Starting service-email..."
    );

    let sender = EmailSender::new(Duration::from_millis(cli.send_delay_ms));
    let service = sender.into_service(&config)?;
    let report = service.run_until(shutdown_signal()).await?;

    info!(?report, "Service shutdown complete");
    Ok(())
}
