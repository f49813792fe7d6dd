//! 随机订单生成
//!
//! 订单与感谢邮件都以用户 ID 为 key 发送，保证同一用户的消息在各自 topic
//! 中有序。每个订单都会等待两条消息的确认后再继续下一个。

use ecommerce_shared::config::{AppConfig, ClientOptions};
use ecommerce_shared::dispatcher::KafkaDispatcher;
use ecommerce_shared::events::{Order, default_registry, topics};
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::OrderError;

/// 感谢邮件正文
pub const THANK_YOU_EMAIL: &str = "Thank you for your order! We are processing your order!";

/// 订单金额下限（含）
pub const MIN_AMOUNT: f64 = 1.0;
/// 订单金额上限（不含）
pub const MAX_AMOUNT: f64 = 5001.0;

/// 订单生成器，持有订单与邮件两个 Dispatcher
pub struct OrderGenerator {
    orders: KafkaDispatcher<Order>,
    emails: KafkaDispatcher<String>,
}

impl OrderGenerator {
    pub fn new(orders: KafkaDispatcher<Order>, emails: KafkaDispatcher<String>) -> Self {
        Self { orders, emails }
    }

    /// 连接 Kafka，创建两个 Dispatcher
    pub fn connect(config: &AppConfig) -> Result<Self, OrderError> {
        let registry = default_registry();
        let options = ClientOptions::new();

        let orders = KafkaDispatcher::connect(&config.kafka, &options, &registry)?;
        let emails = KafkaDispatcher::connect(&config.kafka, &options, &registry)?;
        Ok(Self::new(orders, emails))
    }

    /// 生成一个随机订单，金额保留两位小数
    pub fn random_order() -> Order {
        let amount = rand::rng().random_range(MIN_AMOUNT..MAX_AMOUNT);
        let amount = ((amount * 100.0).round() / 100.0).min(MAX_AMOUNT - 0.01);

        Order::new(
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
            amount,
        )
    }

    /// 发送订单及其感谢邮件，等待两者都被确认
    pub async fn publish(&self, order: &Order) -> Result<(), OrderError> {
        let key = order.user_id.as_str();

        let order_sent = self.orders.send(topics::NEW_ORDER, key, order)?;
        let email_sent = self
            .emails
            .send(topics::SEND_EMAIL, key, &THANK_YOU_EMAIL.to_string())?;

        let position = order_sent.await.map_err(|source| OrderError::OrderDispatch {
            order_id: order.order_id.clone(),
            source,
        })?;
        email_sent.await.map_err(|source| OrderError::EmailDispatch {
            user_id: order.user_id.clone(),
            source,
        })?;

        info!(
            user_id = %order.user_id,
            order_id = %order.order_id,
            amount = order.amount,
            partition = position.partition,
            offset = position.offset,
            "新订单已发送"
        );
        Ok(())
    }

    /// 依次生成并发送 `count` 个订单
    pub async fn generate(&self, count: usize) -> Result<Vec<Order>, OrderError> {
        let mut sent = Vec::with_capacity(count);
        for _ in 0..count {
            let order = Self::random_order();
            self.publish(&order).await?;
            sent.push(order);
        }
        Ok(sent)
    }

    /// 刷新在途消息并关闭两个 Dispatcher
    ///
    /// 两个都会尝试关闭，返回第一个错误。
    pub fn close(&self) -> Result<(), OrderError> {
        let orders = self.orders.close();
        let emails = self.emails.close();
        if let Err(e) = &emails {
            warn!(error = %e, "关闭邮件 Dispatcher 出错");
        }
        orders?;
        emails?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_order_amount_range() {
        for _ in 0..1000 {
            let order = OrderGenerator::random_order();
            assert!(order.amount >= MIN_AMOUNT);
            assert!(order.amount < MAX_AMOUNT);
            // 保留两位小数
            let cents = order.amount * 100.0;
            assert!((cents - cents.round()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_random_order_ids_are_unique() {
        let a = OrderGenerator::random_order();
        let b = OrderGenerator::random_order();
        assert_ne!(a.user_id, b.user_id);
        assert_ne!(a.order_id, b.order_id);
        assert!(Uuid::parse_str(&a.order_id).is_ok());
    }
}
