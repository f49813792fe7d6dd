//! Prometheus 指标模块
//!
//! 基于 metrics crate 记录分发与消费指标。配置了端口时由
//! metrics-exporter-prometheus 自带的 HTTP 监听器暴露 `/metrics`。
//! 未安装 recorder 时记录函数为空操作。

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// 安装 Prometheus recorder 并启动抓取端点
///
/// 需要在 tokio 运行时内调用。
pub fn init(service_name: &str, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    register_common_metrics(service_name);
    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// 注册指标描述，出现在 `/metrics` 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "dispatch_total",
        "Total number of records handed to the log, by final status"
    );
    metrics::describe_counter!(
        "records_consumed_total",
        "Total number of records consumed, by outcome"
    );
    metrics::describe_counter!(
        "handler_retries_total",
        "Total number of failed handler invocations"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

// ============================================================================
// 指标记录函数
// ============================================================================

/// 记录一次分发结果
///
/// status: `rejected`（入队失败）、`acknowledged`、`failed`（投递失败）
#[inline]
pub fn record_dispatch(topic: &str, status: &str) {
    metrics::counter!(
        "dispatch_total",
        "topic" => topic.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录一条记录的消费结果
///
/// outcome: `success`、`failed`（重试耗尽）、`malformed`（无法解析）
#[inline]
pub fn record_consumed(topic: &str, group: &str, outcome: &str) {
    metrics::counter!(
        "records_consumed_total",
        "topic" => topic.to_string(),
        "group" => group.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录处理器失败的调用次数
#[inline]
pub fn record_handler_failures(topic: &str, group: &str, failed_attempts: u32) {
    metrics::counter!(
        "handler_retries_total",
        "topic" => topic.to_string(),
        "group" => group.to_string()
    )
    .increment(u64::from(failed_attempts));
}
