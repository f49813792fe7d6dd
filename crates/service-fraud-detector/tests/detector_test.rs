//! 欺诈检测消费循环集成测试

use std::time::Duration;

use ecommerce_shared::KafkaDispatcher;
use ecommerce_shared::codec::{JsonCodec, Payload};
use ecommerce_shared::config::{ClientOptions, keys};
use ecommerce_shared::events::{Order, default_registry, topics};
use ecommerce_shared::service::KafkaService;
use ecommerce_shared::test_utils::{MemoryLog, fast_options, wait_until};
use service_fraud_detector::{FraudDetector, GROUP_NAME};

#[tokio::test]
async fn test_detector_consumes_new_orders() {
    let log = MemoryLog::new(2);
    let registry = default_registry();

    let codec = JsonCodec::<Order>::configure(
        &ClientOptions::new().with(keys::TYPE_DESCRIPTOR, Order::TYPE_NAME),
        &registry,
    )
    .unwrap();
    let orders =
        KafkaDispatcher::with_producer(codec, Box::new(log.producer()), Duration::from_secs(1));

    let service = KafkaService::with_consumer(
        GROUP_NAME,
        topics::NEW_ORDER,
        FraudDetector::new(Duration::from_millis(1)),
        &fast_options(0),
        &registry,
        Box::new(log.consumer(GROUP_NAME, topics::NEW_ORDER)),
    )
    .unwrap();
    let (handle, task) = service.spawn();

    for (user, order) in [("user-1", "o-1"), ("user-2", "o-2"), ("user-1", "o-3")] {
        orders
            .send_and_wait(topics::NEW_ORDER, user, &Order::new(user, order, 99.9))
            .await
            .unwrap();
    }
    // 无法解析的订单不影响后续记录
    log.append_raw(topics::NEW_ORDER, Some("user-3"), Some(b"garbage".as_slice()));

    let committed = |log: &MemoryLog| {
        (0..2)
            .filter_map(|p| log.committed(GROUP_NAME, topics::NEW_ORDER, p))
            .sum::<i64>()
    };
    assert!(wait_until(Duration::from_secs(5), || committed(&log) == 4).await);

    handle.close().await;
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(log.consumer_closes(), 1);
}
