//! 新订单欺诈检查
//!
//! 目前只记录订单信息并模拟耗时检查，不做拒绝判定。

use std::time::Duration;

use async_trait::async_trait;
use ecommerce_shared::config::AppConfig;
use ecommerce_shared::error::Result;
use ecommerce_shared::events::{Order, default_registry, topics};
use ecommerce_shared::service::{ConsumerRecord, KafkaService, RecordHandler};
use tracing::{info, warn};

use crate::error::FraudError;

/// 消费组名称
pub const GROUP_NAME: &str = "FraudDetectorService";

/// 单个订单的默认检查耗时
pub const DEFAULT_PROCESSING_DELAY: Duration = Duration::from_secs(5);

/// 欺诈检测处理器
#[derive(Debug, Clone)]
pub struct FraudDetector {
    processing_delay: Duration,
}

impl Default for FraudDetector {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESSING_DELAY)
    }
}

impl FraudDetector {
    pub fn new(processing_delay: Duration) -> Self {
        Self { processing_delay }
    }

    /// 连接 Kafka，创建订阅新订单的消费循环
    pub fn into_service(
        self,
        config: &AppConfig,
    ) -> std::result::Result<KafkaService<Order, Self>, FraudError> {
        let service = KafkaService::new(
            &config.kafka,
            GROUP_NAME,
            topics::NEW_ORDER,
            self,
            &config.consumer.to_options(),
            &default_registry(),
        )?;
        Ok(service)
    }
}

#[async_trait]
impl RecordHandler<Order> for FraudDetector {
    async fn handle(&self, record: &ConsumerRecord<Order>) -> Result<()> {
        let Some(order) = &record.value else {
            warn!(
                key = ?record.key,
                partition = record.partition,
                offset = record.offset,
                "收到空订单，跳过检查"
            );
            return Ok(());
        };

        info!(
            key = ?record.key,
            user_id = %order.user_id,
            order_id = %order.order_id,
            amount = order.amount,
            partition = record.partition,
            offset = record.offset,
            "处理新订单，检查欺诈"
        );

        tokio::time::sleep(self.processing_delay).await;

        info!(order_id = %order.order_id, "订单检查完成");
        Ok(())
    }
}
