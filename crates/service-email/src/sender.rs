//! 邮件发送

use std::time::Duration;

use async_trait::async_trait;
use ecommerce_shared::config::AppConfig;
use ecommerce_shared::error::Result;
use ecommerce_shared::events::{default_registry, topics};
use ecommerce_shared::service::{ConsumerRecord, KafkaService, RecordHandler};
use tracing::{info, warn};

use crate::error::EmailError;

/// 消费组名称
pub const GROUP_NAME: &str = "EmailService";

/// 单封邮件的默认发送耗时
pub const DEFAULT_SEND_DELAY: Duration = Duration::from_secs(1);

/// 邮件发送处理器
///
/// 邮件正文即记录值，收件人由记录 key（用户 ID）确定。
#[derive(Debug, Clone)]
pub struct EmailSender {
    send_delay: Duration,
}

impl Default for EmailSender {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_DELAY)
    }
}

impl EmailSender {
    pub fn new(send_delay: Duration) -> Self {
        Self { send_delay }
    }

    /// 连接 Kafka，创建订阅待发送邮件的消费循环
    pub fn into_service(
        self,
        config: &AppConfig,
    ) -> std::result::Result<KafkaService<String, Self>, EmailError> {
        let service = KafkaService::new(
            &config.kafka,
            GROUP_NAME,
            topics::SEND_EMAIL,
            self,
            &config.consumer.to_options(),
            &default_registry(),
        )?;
        Ok(service)
    }
}

#[async_trait]
impl RecordHandler<String> for EmailSender {
    async fn handle(&self, record: &ConsumerRecord<String>) -> Result<()> {
        let Some(body) = &record.value else {
            warn!(key = ?record.key, offset = record.offset, "邮件正文为空，跳过发送");
            return Ok(());
        };

        info!(
            recipient = ?record.key,
            partition = record.partition,
            offset = record.offset,
            body = %body,
            "发送邮件"
        );

        tokio::time::sleep(self.send_delay).await;

        info!(recipient = ?record.key, "邮件已发送");
        Ok(())
    }
}
