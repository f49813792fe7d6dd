//! 欺诈检测服务
//!
//! 消费新订单并逐条检查，收到 Ctrl+C 或 SIGTERM 后处理完当前订单再退出。

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use ecommerce_shared::config::AppConfig;
use ecommerce_shared::observability;
use ecommerce_shared::signal::shutdown_signal;
use service_fraud_detector::FraudDetector;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "service-fraud-detector")]
#[command(version, about = "新订单欺诈检测服务")]
struct Cli {
    /// 单个订单的模拟检查耗时（毫秒）
    #[arg(long, default_value = "5000")]
    processing_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load("service-fraud-detector")?;
    observability::init(&config.service_name, &config.observability)?;
    info!(
        brokers = %config.kafka.brokers,
        environment = %config.environment,
        "Starting service-fraud-detector..."
    );

    let detector = FraudDetector::new(Duration::from_millis(cli.processing_delay_ms));
    let service = detector.into_service(&config)?;
    let report = service.run_until(shutdown_signal()).await?;

    info!(?report, "Service shutdown complete");
    Ok(())
}
