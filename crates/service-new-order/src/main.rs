//! 新订单服务
//!
//! 生成一批随机订单后退出。

use anyhow::Result;
use clap::Parser;
use ecommerce_shared::config::AppConfig;
use ecommerce_shared::observability;
use service_new_order::OrderGenerator;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "service-new-order")]
#[command(version, about = "随机订单生成服务")]
struct Cli {
    /// 生成的订单数量
    #[arg(short, long, default_value = "10")]
    count: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = AppConfig::load("service-new-order")?;
    observability::init(&config.service_name, &config.observability)?;
    info!(
        brokers = %config.kafka.brokers,
        count = cli.count,
        "Starting service-new-order..."
    );

    let generator = OrderGenerator::connect(&config)?;
    let result = generator.generate(cli.count).await;
    // 无论发送是否成功都先刷新在途消息
    generator.close()?;
    let orders = result?;

    info!(sent = orders.len(), "All orders sent");
    Ok(())
}
