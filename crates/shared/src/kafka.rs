//! Kafka 基础设施封装
//!
//! 定义日志服务边界上的两个 trait：[`LogProducer`] 与 [`LogConsumer`]，
//! 并提供基于 rdkafka 的实现。Dispatcher 与消费循环只依赖 trait，
//! 测试时可替换为内存实现（见 `test_utils::MemoryLog`）。

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ClientOptions, KafkaConfig};
use crate::error::{EcommerceError, Result};

// ---------------------------------------------------------------------------
// 边界数据类型
// ---------------------------------------------------------------------------

/// 日志为已写入记录分配的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordPosition {
    pub partition: i32,
    pub offset: i64,
}

/// 待发送的记录
#[derive(Debug, Clone, Copy)]
pub struct OutgoingRecord<'a> {
    pub topic: &'a str,
    pub key: &'a str,
    pub payload: &'a [u8],
}

/// 从日志拉取到的原始记录
///
/// 拥有所有字段，可以安全地跨 await 点传递。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    /// `None` 表示空负载（墓碑记录）
    pub payload: Option<Vec<u8>>,
    pub timestamp: Option<i64>,
}

impl RawRecord {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: decode_key(msg.topic(), msg.partition(), msg.offset(), msg.key()),
            payload: msg.payload().map(<[u8]>::to_vec),
            timestamp: msg.timestamp().to_millis(),
        }
    }
}

/// 非 UTF-8 的 key 按有损方式转换，无法识别的字节替换为 U+FFFD
fn decode_key(topic: &str, partition: i32, offset: i64, key: Option<&[u8]>) -> Option<String> {
    let key = key?;
    match std::str::from_utf8(key) {
        Ok(key) => Some(key.to_string()),
        Err(e) => {
            warn!(
                topic,
                partition,
                offset,
                key_len = key.len(),
                error = %e,
                "记录 key 不是合法的 UTF-8，已做有损转换"
            );
            Some(String::from_utf8_lossy(key).into_owned())
        }
    }
}

/// 投递确认
pub type DeliveryFuture = BoxFuture<'static, Result<RecordPosition>>;

// ---------------------------------------------------------------------------
// 边界 trait
// ---------------------------------------------------------------------------

/// 日志生产端连接
pub trait LogProducer: Send + Sync {
    /// 同步入队一条记录，返回投递确认
    ///
    /// 入队顺序即同一分区内的写入顺序。
    fn enqueue(&self, record: OutgoingRecord<'_>) -> Result<DeliveryFuture>;

    /// 在限定时间内等待在途记录投递完成
    fn flush(&self, timeout: Duration) -> Result<()>;
}

/// 日志消费端连接（含消费组成员身份）
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LogConsumer: Send {
    /// 拉取下一批记录，最多等待 `timeout`；超时返回空批次
    async fn poll_batch(&mut self, timeout: Duration, max_records: usize)
    -> Result<Vec<RawRecord>>;

    /// 提交该记录的消费位点
    fn commit(&mut self, record: &RawRecord) -> Result<()>;

    /// 退出消费组并释放连接
    fn close(&mut self) -> Result<()>;
}

// ---------------------------------------------------------------------------
// KafkaLogProducer
// ---------------------------------------------------------------------------

/// 基于 `FutureProducer` 的生产端连接
pub struct KafkaLogProducer {
    producer: FutureProducer,
}

impl KafkaLogProducer {
    /// 根据配置创建生产者
    ///
    /// `message.timeout.ms` 限定单条消息的投递时间，超时后投递确认以失败结束，
    /// 由调用方决定是否重发。
    pub fn new(config: &KafkaConfig, extra: &ClientOptions) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string());
        for (key, value) in extra.passthrough() {
            client_config.set(key, value);
        }

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| EcommerceError::Connection(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self { producer })
    }
}

impl LogProducer for KafkaLogProducer {
    fn enqueue(&self, record: OutgoingRecord<'_>) -> Result<DeliveryFuture> {
        let future_record = FutureRecord::to(record.topic)
            .key(record.key)
            .payload(record.payload);

        let delivery = self
            .producer
            .send_result(future_record)
            .map_err(|(e, _)| EcommerceError::Dispatch(format!("消息入队失败: {e}")))?;

        Ok(async move {
            // rdkafka 0.39+ 投递结果为 Delivery 结构体
            match delivery.await {
                Ok(Ok(delivery)) => Ok(RecordPosition {
                    partition: delivery.partition,
                    offset: delivery.offset,
                }),
                Ok(Err((e, _))) => Err(EcommerceError::Dispatch(format!("消息投递失败: {e}"))),
                Err(_) => Err(EcommerceError::Dispatch(
                    "投递结果通道已关闭".to_string(),
                )),
            }
        }
        .boxed())
    }

    fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(timeout)
            .map_err(|e| EcommerceError::Dispatch(format!("刷新在途消息失败: {e}")))
    }
}

// ---------------------------------------------------------------------------
// KafkaLogConsumer
// ---------------------------------------------------------------------------

/// 基于 `StreamConsumer` 的消费端连接
///
/// 关闭自动提交，由消费循环在处理完每条记录后显式提交位点。
pub struct KafkaLogConsumer {
    consumer: StreamConsumer,
    group: String,
    topic: String,
}

impl KafkaLogConsumer {
    /// 创建消费者并订阅 topic
    ///
    /// 每个实例使用独立的 `client.id`，同一消费组的多个实例共享分区分配。
    pub fn new(
        config: &KafkaConfig,
        group: &str,
        topic: &str,
        extra: &ClientOptions,
    ) -> Result<Self> {
        let client_id = format!("{group}-{}", Uuid::new_v4());

        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", group)
            .set("client.id", &client_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");
        for (key, value) in extra.passthrough() {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| EcommerceError::Connection(format!("创建消费者失败: {e}")))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| EcommerceError::Connection(format!("订阅 topic 失败: {e}")))?;

        info!(brokers = %config.brokers, group, topic, client_id, "Kafka 消费者已订阅");
        Ok(Self {
            consumer,
            group: group.to_string(),
            topic: topic.to_string(),
        })
    }
}

/// 将接收结果并入批次；只有不可恢复的连接错误会向上返回
fn accept(result: KafkaResult<BorrowedMessage<'_>>, batch: &mut Vec<RawRecord>) -> Result<()> {
    match result {
        Ok(msg) => {
            let record = RawRecord::from_borrowed(&msg);
            debug!(
                topic = %record.topic,
                partition = record.partition,
                offset = record.offset,
                "收到 Kafka 消息"
            );
            batch.push(record);
            Ok(())
        }
        Err(e) if is_fatal(&e) => Err(EcommerceError::Connection(e.to_string())),
        Err(e) => {
            // librdkafka 会自行重连，瞬时错误只记录
            warn!(error = %e, "接收 Kafka 消息出错");
            Ok(())
        }
    }
}

fn is_fatal(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::AllBrokersDown
                | RDKafkaErrorCode::Fatal
                | RDKafkaErrorCode::Authentication
                | RDKafkaErrorCode::SaslAuthenticationFailed
                | RDKafkaErrorCode::TopicAuthorizationFailed
                | RDKafkaErrorCode::GroupAuthorizationFailed
        )
    )
}

#[async_trait]
impl LogConsumer for KafkaLogConsumer {
    async fn poll_batch(
        &mut self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<RawRecord>> {
        let mut batch = Vec::with_capacity(max_records);

        let first = match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(result) => result,
            Err(_) => return Ok(batch),
        };
        accept(first, &mut batch)?;

        // 已在本地缓冲的消息一并取出，不再等待
        while batch.len() < max_records {
            match self.consumer.recv().now_or_never() {
                Some(result) => accept(result, &mut batch)?,
                None => break,
            }
        }

        Ok(batch)
    }

    fn commit(&mut self, record: &RawRecord) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )
        .map_err(|e| EcommerceError::Connection(format!("构造提交位点失败: {e}")))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| EcommerceError::Connection(format!("提交位点失败: {e}")))
    }

    fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        info!(group = %self.group, topic = %self.topic, "Kafka 消费者已退出消费组");
        Ok(())
    }
}
