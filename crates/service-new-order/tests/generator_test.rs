//! 订单生成器集成测试

use std::time::Duration;

use ecommerce_shared::KafkaDispatcher;
use ecommerce_shared::codec::{JsonCodec, Payload};
use ecommerce_shared::config::{ClientOptions, keys};
use ecommerce_shared::events::{Order, default_registry, topics};
use ecommerce_shared::test_utils::MemoryLog;
use service_new_order::{OrderError, OrderGenerator, THANK_YOU_EMAIL};

fn dispatcher<T: Payload>(log: &MemoryLog) -> KafkaDispatcher<T> {
    let codec = JsonCodec::configure(
        &ClientOptions::new().with(keys::TYPE_DESCRIPTOR, T::TYPE_NAME),
        &default_registry(),
    )
    .unwrap();
    KafkaDispatcher::with_producer(codec, Box::new(log.producer()), Duration::from_secs(1))
}

fn generator(log: &MemoryLog) -> OrderGenerator {
    OrderGenerator::new(dispatcher(log), dispatcher(log))
}

#[tokio::test]
async fn test_generate_publishes_orders_and_emails() {
    let log = MemoryLog::new(3);
    let generator = generator(&log);

    let orders = generator.generate(5).await.unwrap();
    generator.close().unwrap();

    assert_eq!(orders.len(), 5);
    assert_eq!(log.len(topics::NEW_ORDER), 5);
    assert_eq!(log.len(topics::SEND_EMAIL), 5);
    // 两个 Dispatcher 各刷新一次
    assert_eq!(log.producer_flushes(), 2);

    for record in log.records(topics::NEW_ORDER) {
        let order: Order = serde_json::from_slice(record.payload.as_deref().unwrap()).unwrap();
        assert_eq!(record.key.as_deref(), Some(order.user_id.as_str()));
        assert!(orders.contains(&order));
    }

    for record in log.records(topics::SEND_EMAIL) {
        let body: String = serde_json::from_slice(record.payload.as_deref().unwrap()).unwrap();
        assert_eq!(body, THANK_YOU_EMAIL);
        assert!(orders.iter().any(|o| Some(o.user_id.as_str()) == record.key.as_deref()));
    }
}

#[tokio::test]
async fn test_unreachable_log_reports_order_failure() {
    let log = MemoryLog::new(1);
    log.set_reachable(false);
    let generator = generator(&log);

    let err = generator.generate(1).await.unwrap_err();
    assert!(matches!(err, OrderError::OrderDispatch { .. }));
    assert_eq!(log.len(topics::NEW_ORDER), 0);
}

#[tokio::test]
async fn test_publish_after_close_fails() {
    let log = MemoryLog::new(1);
    let generator = generator(&log);
    generator.close().unwrap();
    generator.close().unwrap();

    let err = generator
        .publish(&OrderGenerator::random_order())
        .await
        .unwrap_err();
    assert!(matches!(err, OrderError::Shared(_)));
    assert_eq!(log.producer_flushes(), 2);
}
