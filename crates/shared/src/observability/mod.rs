//! 统一可观测性模块
//!
//! 日志与指标的统一初始化入口。各服务的 `main` 在加载配置后调用一次 [`init`]。

pub mod metrics;
pub mod tracing;

use ::tracing::info;
use anyhow::Result;

use crate::config::ObservabilityConfig;

/// 统一初始化可观测性
///
/// 初始化顺序：
/// 1. Tracing（日志）
/// 2. Metrics（配置了端口时启动 Prometheus 导出）
///
/// # Example
///
/// ```ignore
/// use ecommerce_shared::config::AppConfig;
/// use ecommerce_shared::observability;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::load("service-email")?;
///     observability::init(&config.service_name, &config.observability)?;
///
///     // 应用逻辑...
///
///     Ok(())
/// }
/// ```
pub fn init(service_name: &str, config: &ObservabilityConfig) -> Result<()> {
    tracing::init(config)?;

    if let Some(port) = config.metrics_port {
        metrics::init(service_name, port)?;
    }

    info!(
        service = service_name,
        log_level = %config.log_level,
        json_logs = config.json_logs,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}
