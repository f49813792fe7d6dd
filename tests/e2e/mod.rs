//! 电商服务端到端测试
//!
//! 新订单服务写入的订单和邮件，分别被欺诈检测服务与邮件服务消费。
//! 所有服务共享同一个内存日志，不依赖外部 Kafka。

use std::time::Duration;

use ecommerce_shared::KafkaDispatcher;
use ecommerce_shared::codec::{JsonCodec, Payload};
use ecommerce_shared::config::{ClientOptions, keys};
use ecommerce_shared::events::{default_registry, topics};
use ecommerce_shared::service::{KafkaService, ServiceState};
use ecommerce_shared::test_utils::{MemoryLog, fast_options, wait_until};
use service_email::EmailSender;
use service_fraud_detector::FraudDetector;
use service_new_order::OrderGenerator;

const PARTITIONS: i32 = 3;

fn dispatcher<T: Payload>(log: &MemoryLog) -> KafkaDispatcher<T> {
    let codec = JsonCodec::configure(
        &ClientOptions::new().with(keys::TYPE_DESCRIPTOR, T::TYPE_NAME),
        &default_registry(),
    )
    .unwrap();
    KafkaDispatcher::with_producer(codec, Box::new(log.producer()), Duration::from_secs(1))
}

fn committed_total(log: &MemoryLog, group: &str, topic: &str) -> i64 {
    (0..PARTITIONS)
        .filter_map(|p| log.committed(group, topic, p))
        .sum()
}

#[tokio::test]
async fn test_new_orders_flow_through_all_services() -> anyhow::Result<()> {
    let log = MemoryLog::new(PARTITIONS);

    let fraud = KafkaService::with_consumer(
        service_fraud_detector::GROUP_NAME,
        topics::NEW_ORDER,
        FraudDetector::new(Duration::from_millis(1)),
        &fast_options(0),
        &default_registry(),
        Box::new(log.consumer(service_fraud_detector::GROUP_NAME, topics::NEW_ORDER)),
    )?;
    let email = KafkaService::with_consumer(
        service_email::GROUP_NAME,
        topics::SEND_EMAIL,
        EmailSender::new(Duration::from_millis(1)),
        &fast_options(0),
        &default_registry(),
        Box::new(log.consumer(service_email::GROUP_NAME, topics::SEND_EMAIL)),
    )?;
    let (fraud_handle, fraud_task) = fraud.spawn();
    let (email_handle, email_task) = email.spawn();

    let generator = OrderGenerator::new(dispatcher(&log), dispatcher(&log));
    let orders = generator.generate(10).await?;
    generator.close()?;
    assert_eq!(orders.len(), 10);

    assert!(
        wait_until(Duration::from_secs(10), || {
            committed_total(&log, service_fraud_detector::GROUP_NAME, topics::NEW_ORDER) == 10
                && committed_total(&log, service_email::GROUP_NAME, topics::SEND_EMAIL) == 10
        })
        .await
    );

    fraud_handle.close().await;
    email_handle.close().await;
    let fraud_report = fraud_task.await??;
    let email_report = email_task.await??;

    assert_eq!(fraud_report.succeeded, 10);
    assert_eq!(email_report.succeeded, 10);
    assert_eq!(fraud_handle.state(), ServiceState::Closed);
    assert_eq!(email_handle.state(), ServiceState::Closed);
    assert_eq!(log.consumer_closes(), 2);
    Ok(())
}

#[tokio::test]
async fn test_restarted_consumer_resumes_after_committed_offset() -> anyhow::Result<()> {
    let log = MemoryLog::new(1);
    let generator = OrderGenerator::new(dispatcher(&log), dispatcher(&log));
    let group = service_fraud_detector::GROUP_NAME;

    generator.generate(2).await?;

    let first = KafkaService::with_consumer(
        group,
        topics::NEW_ORDER,
        FraudDetector::new(Duration::from_millis(1)),
        &fast_options(0),
        &default_registry(),
        Box::new(log.consumer(group, topics::NEW_ORDER)),
    )?;
    let (handle, task) = first.spawn();
    assert!(
        wait_until(Duration::from_secs(5), || log.committed(group, topics::NEW_ORDER, 0) == Some(2))
            .await
    );
    handle.close().await;
    assert_eq!(task.await??.succeeded, 2);

    generator.generate(1).await?;
    generator.close()?;

    let second = KafkaService::with_consumer(
        group,
        topics::NEW_ORDER,
        FraudDetector::new(Duration::from_millis(1)),
        &fast_options(0),
        &default_registry(),
        Box::new(log.consumer(group, topics::NEW_ORDER)),
    )?;
    let (handle, task) = second.spawn();
    assert!(
        wait_until(Duration::from_secs(5), || log.committed(group, topics::NEW_ORDER, 0) == Some(3))
            .await
    );
    handle.close().await;

    // 重启后只处理新增的订单
    assert_eq!(task.await??.succeeded, 1);
    Ok(())
}
