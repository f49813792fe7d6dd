//! 发布/订阅链路集成测试
//!
//! Dispatcher 写入内存日志，消费循环从同一日志读取，验证端到端的
//! 投递、重试与关闭语义。

use std::sync::Arc;
use std::time::Duration;

use ecommerce_shared::codec::{JsonCodec, Payload, TypeRegistry};
use ecommerce_shared::config::{ClientOptions, keys};
use ecommerce_shared::events::{Order, default_registry};
use ecommerce_shared::service::{ServiceState, handler_fn};
use ecommerce_shared::test_utils::{
    MemoryLog, RecordingHandler, fast_options, test_order, test_user_id, wait_until,
};
use ecommerce_shared::{ConsumerRecord, EcommerceError, KafkaDispatcher, KafkaService};

const GROUP: &str = "OrderAuditService";
const TOPIC: &str = "ORDERS";

fn dispatcher<T: Payload>(log: &MemoryLog, registry: &TypeRegistry) -> KafkaDispatcher<T> {
    let options = ClientOptions::new().with(keys::TYPE_DESCRIPTOR, T::TYPE_NAME);
    let codec = JsonCodec::configure(&options, registry).unwrap();
    KafkaDispatcher::with_producer(codec, Box::new(log.producer()), Duration::from_secs(1))
}

fn service<H>(log: &MemoryLog, handler: H, retry_count: u32) -> KafkaService<Order, H>
where
    H: ecommerce_shared::RecordHandler<Order>,
{
    KafkaService::with_consumer(
        GROUP,
        TOPIC,
        handler,
        &fast_options(retry_count),
        &default_registry(),
        Box::new(log.consumer(GROUP, TOPIC)),
    )
    .unwrap()
}

#[tokio::test]
async fn test_order_round_trip() {
    let log = MemoryLog::new(1);
    let registry = default_registry();
    let orders = dispatcher::<Order>(&log, &registry);

    let handler = RecordingHandler::new();
    let (handle, task) = service(&log, handler.clone(), 0).spawn();

    let user_id = test_user_id();
    // 未取整的金额经过日志后保持不变
    let order = test_order(&user_id, 3965.5448327864115);
    let position = orders.send_and_wait(TOPIC, &user_id, &order).await.unwrap();
    assert_eq!(position.offset, 0);

    assert!(wait_until(Duration::from_secs(5), || handler.received().len() == 1).await);
    handle.close().await;
    let report = task.await.unwrap().unwrap();

    let record = &handler.received()[0];
    assert_eq!(record.key.as_deref(), Some(user_id.as_str()));
    assert_eq!(record.value, Some(order));
    assert_eq!(report.succeeded, 1);
    assert_eq!(handle.state(), ServiceState::Closed);
}

#[tokio::test]
async fn test_handler_succeeds_on_last_retry() {
    let log = MemoryLog::new(1);
    let retry_count = 3;
    let handler = RecordingHandler::failing_first(retry_count);
    let (handle, task) = service(&log, handler.clone(), retry_count).spawn();

    let orders = dispatcher::<Order>(&log, &default_registry());
    orders
        .send_and_wait(TOPIC, "user-1", &Order::new("user-1", "o-1", 10.0))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || handler.received().len() == 1).await);
    handle.close().await;
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.failed_attempts, u64::from(retry_count));
    assert_eq!(handler.calls(), retry_count + 1);
}

#[tokio::test]
async fn test_exhausted_retries_skip_record_and_continue() {
    let log = MemoryLog::new(1);
    let retry_count = 2;
    // 第一条记录的全部调用都失败
    let handler = RecordingHandler::failing_first(retry_count + 1);
    let (handle, task) = service(&log, handler.clone(), retry_count).spawn();

    let orders = dispatcher::<Order>(&log, &default_registry());
    orders
        .send_and_wait(TOPIC, "user-1", &Order::new("user-1", "o-1", 10.0))
        .await
        .unwrap();
    orders
        .send_and_wait(TOPIC, "user-1", &Order::new("user-1", "o-2", 20.0))
        .await
        .unwrap();

    assert!(wait_until(Duration::from_secs(5), || handler.received().len() == 1).await);
    handle.close().await;
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(handler.received()[0].value.as_ref().unwrap().order_id, "o-2");
    // 失败的记录同样提交了位点
    assert_eq!(log.committed(GROUP, TOPIC, 0), Some(2));
}

#[tokio::test]
async fn test_closure_handler() {
    let log = MemoryLog::new(1);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();

    let handler = handler_fn(move |record: ConsumerRecord<Order>| {
        let sink = sink.clone();
        async move {
            sink.lock().push(record.offset);
            Ok(())
        }
    });
    let (handle, task) = service(&log, handler, 0).spawn();

    let orders = dispatcher::<Order>(&log, &default_registry());
    for i in 0..3 {
        let _ = orders.send(TOPIC, "user-1", &Order::new("user-1", format!("o-{i}"), 1.0));
    }

    assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 3).await);
    handle.close().await;
    task.await.unwrap().unwrap();

    assert_eq!(*seen.lock(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_close_twice_releases_once() {
    let log = MemoryLog::new(1);
    let (handle, task) = service(&log, RecordingHandler::new(), 0).spawn();

    handle.close().await;
    handle.close().await;
    task.await.unwrap().unwrap();

    assert_eq!(log.consumer_closes(), 1);
    assert_eq!(handle.state(), ServiceState::Closed);
}

#[tokio::test]
async fn test_unreachable_log_terminates_run() {
    let log = MemoryLog::new(1);
    let (handle, task) = service(&log, RecordingHandler::new(), 0).spawn();

    log.set_reachable(false);
    let err = task.await.unwrap().unwrap_err();

    assert!(matches!(err, EcommerceError::Connection(_)));
    assert_eq!(handle.state(), ServiceState::Closed);
    assert_eq!(log.consumer_closes(), 1);
}

#[tokio::test]
async fn test_string_payloads() {
    let log = MemoryLog::new(1);
    let emails = dispatcher::<String>(&log, &default_registry());

    let body = "Thank you for your order! We are processing your order!".to_string();
    emails.send_and_wait("EMAILS", "user-1", &body).await.unwrap();

    let raw = log.records("EMAILS");
    let codec: JsonCodec<String> = JsonCodec::configure(
        &ClientOptions::new().with(keys::TYPE_DESCRIPTOR, String::TYPE_NAME),
        &default_registry(),
    )
    .unwrap();
    assert_eq!(codec.deserialize(raw[0].payload.as_deref()).unwrap(), Some(body));
}

#[tokio::test]
async fn test_dispatcher_shared_across_tasks() {
    let log = MemoryLog::new(2);
    let orders = Arc::new(dispatcher::<Order>(&log, &default_registry()));

    let mut tasks = Vec::new();
    for user in 0..4 {
        let orders = orders.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..5 {
                let user_id = format!("user-{user}");
                orders
                    .send_and_wait(TOPIC, &user_id, &Order::new(&user_id, format!("o-{i}"), 1.0))
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(log.len(TOPIC), 20);
    orders.close().unwrap();
    assert_eq!(log.producer_flushes(), 1);
}
