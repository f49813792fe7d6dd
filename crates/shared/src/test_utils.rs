//! 测试工具模块
//!
//! 提供内存版日志服务 [`MemoryLog`]、记录型处理器与测试数据生成器，
//! 让 Dispatcher 与消费循环可以在没有 Kafka 的情况下完整测试。

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::codec::Payload;
use crate::config::{ClientOptions, keys};
use crate::error::{EcommerceError, Result};
use crate::events::Order;
use crate::kafka::{
    DeliveryFuture, LogConsumer, LogProducer, OutgoingRecord, RawRecord, RecordPosition,
};
use crate::service::{ConsumerRecord, RecordHandler};

// ==================== 测试数据 ====================

/// 生成唯一的测试用户 ID
pub fn test_user_id() -> String {
    format!("test-user-{}", Uuid::new_v4())
}

/// 生成测试订单
pub fn test_order(user_id: &str, amount: f64) -> Order {
    Order::new(user_id, Uuid::new_v4().to_string(), amount)
}

/// 测试用的消费循环选项：短轮询、几乎无退避
pub fn fast_options(retry_count: u32) -> ClientOptions {
    ClientOptions::new()
        .with(keys::POLL_TIMEOUT, 10)
        .with(keys::RETRY_COUNT, retry_count)
        .with(keys::RETRY_BACKOFF, 1)
        .with(keys::RETRY_MAX_BACKOFF, 5)
}

/// 轮询等待条件成立，超时返回 false
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ==================== MemoryLog ====================

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<String>,
    payload: Option<Vec<u8>>,
    timestamp: i64,
}

#[derive(Debug)]
struct LogState {
    partitions: i32,
    reachable: bool,
    /// topic -> 分区 -> 记录
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic, partition) -> 下一个待消费位点
    committed: HashMap<(String, String, i32), i64>,
    producer_flushes: usize,
    consumer_closes: usize,
}

impl LogState {
    fn partitions_of(&mut self, topic: &str) -> &mut Vec<Vec<StoredRecord>> {
        let count = self.partitions as usize;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); count])
    }

    fn partition_for(&self, key: Option<&str>) -> i32 {
        let Some(key) = key else {
            return 0;
        };
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as i32
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<LogState>,
    appended: Notify,
}

/// 内存版分区日志
///
/// 语义与 Kafka 对齐的部分：
/// - 同一 key 总是落到同一分区，分区内位点从 0 递增
/// - 消费者按消费组记录已提交位点，新消费者从已提交位点继续
///
/// 不模拟分区分配：同组的多个消费者会读到相同的记录。
#[derive(Debug, Clone)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl MemoryLog {
    /// 创建日志，每个 topic 拥有 `partitions` 个分区
    pub fn new(partitions: i32) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LogState {
                    partitions: partitions.max(1),
                    reachable: true,
                    topics: HashMap::new(),
                    committed: HashMap::new(),
                    producer_flushes: 0,
                    consumer_closes: 0,
                }),
                appended: Notify::new(),
            }),
        }
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer { log: self.clone() }
    }

    pub fn consumer(&self, group: &str, topic: &str) -> MemoryConsumer {
        MemoryConsumer {
            log: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            positions: HashMap::new(),
            closed: false,
        }
    }

    /// 模拟日志服务不可达：生产端入队失败，消费端拉取返回连接错误
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.state.lock().reachable = reachable;
    }

    /// 直接写入原始字节，用于构造无法解析的负载
    pub fn append_raw(&self, topic: &str, key: Option<&str>, payload: Option<&[u8]>) -> RecordPosition {
        let position = {
            let mut state = self.inner.state.lock();
            let partition = state.partition_for(key);
            let records = &mut state.partitions_of(topic)[partition as usize];
            records.push(StoredRecord {
                key: key.map(str::to_string),
                payload: payload.map(<[u8]>::to_vec),
                timestamp: Utc::now().timestamp_millis(),
            });
            RecordPosition {
                partition,
                offset: records.len() as i64 - 1,
            }
        };
        self.inner.appended.notify_waiters();
        position
    }

    /// topic 中的记录总数
    pub fn len(&self, topic: &str) -> usize {
        self.inner
            .state
            .lock()
            .topics
            .get(topic)
            .map_or(0, |partitions| partitions.iter().map(Vec::len).sum())
    }

    /// 按分区、位点顺序列出 topic 中的全部记录
    pub fn records(&self, topic: &str) -> Vec<RawRecord> {
        let state = self.inner.state.lock();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };

        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, records)| {
                records
                    .iter()
                    .enumerate()
                    .map(move |(offset, stored)| to_raw(topic, partition as i32, offset as i64, stored))
            })
            .collect()
    }

    /// 消费组在某分区上的已提交位点（下一个待消费位点）
    pub fn committed(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.inner
            .state
            .lock()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    pub fn producer_flushes(&self) -> usize {
        self.inner.state.lock().producer_flushes
    }

    pub fn consumer_closes(&self) -> usize {
        self.inner.state.lock().consumer_closes
    }
}

fn to_raw(topic: &str, partition: i32, offset: i64, stored: &StoredRecord) -> RawRecord {
    RawRecord {
        topic: topic.to_string(),
        partition,
        offset,
        key: stored.key.clone(),
        payload: stored.payload.clone(),
        timestamp: Some(stored.timestamp),
    }
}

/// [`MemoryLog`] 的生产端
#[derive(Debug, Clone)]
pub struct MemoryProducer {
    log: MemoryLog,
}

impl LogProducer for MemoryProducer {
    fn enqueue(&self, record: OutgoingRecord<'_>) -> Result<DeliveryFuture> {
        if !self.log.inner.state.lock().reachable {
            return Err(EcommerceError::Dispatch("日志服务不可达".to_string()));
        }

        let position = self
            .log
            .append_raw(record.topic, Some(record.key), Some(record.payload));
        Ok(futures::future::ready(Ok(position)).boxed())
    }

    fn flush(&self, _timeout: Duration) -> Result<()> {
        self.log.inner.state.lock().producer_flushes += 1;
        Ok(())
    }
}

/// [`MemoryLog`] 的消费端
///
/// `poll_batch` 在返回前不会推进读取位置，被取消时不会丢失记录。
#[derive(Debug)]
pub struct MemoryConsumer {
    log: MemoryLog,
    group: String,
    topic: String,
    /// 分区 -> 下一个读取位点
    positions: HashMap<i32, i64>,
    closed: bool,
}

impl MemoryConsumer {
    fn take_available(&mut self, max_records: usize) -> Result<Vec<RawRecord>> {
        let state = self.log.inner.state.lock();
        if !state.reachable {
            return Err(EcommerceError::Connection("日志服务不可达".to_string()));
        }

        let mut batch = Vec::new();
        let Some(partitions) = state.topics.get(&self.topic) else {
            return Ok(batch);
        };

        for (partition, records) in partitions.iter().enumerate() {
            let partition = partition as i32;
            let committed = state
                .committed
                .get(&(self.group.clone(), self.topic.clone(), partition))
                .copied()
                .unwrap_or(0);
            let position = self.positions.entry(partition).or_insert(committed);

            while batch.len() < max_records && (*position as usize) < records.len() {
                batch.push(to_raw(
                    &self.topic,
                    partition,
                    *position,
                    &records[*position as usize],
                ));
                *position += 1;
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn poll_batch(
        &mut self,
        timeout: Duration,
        max_records: usize,
    ) -> Result<Vec<RawRecord>> {
        if self.closed {
            return Err(EcommerceError::closed(format!("consumer<{}>", self.topic)));
        }

        let deadline = Instant::now() + timeout;
        let log = self.log.clone();
        loop {
            // 先登记等待再检查，避免错过检查与等待之间的写入
            let appended = log.inner.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let batch = self.take_available(max_records)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn commit(&mut self, record: &RawRecord) -> Result<()> {
        self.log.inner.state.lock().committed.insert(
            (self.group.clone(), record.topic.clone(), record.partition),
            record.offset + 1,
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.log.inner.state.lock().consumer_closes += 1;
        Ok(())
    }
}

// ==================== 记录型处理器 ====================

/// 记录收到的每条记录，可预设前 N 次调用失败
#[derive(Debug)]
pub struct RecordingHandler<T> {
    received: Arc<Mutex<Vec<ConsumerRecord<T>>>>,
    calls: Arc<AtomicU32>,
    fail_first: u32,
}

impl<T> Clone for RecordingHandler<T> {
    fn clone(&self) -> Self {
        Self {
            received: self.received.clone(),
            calls: self.calls.clone(),
            fail_first: self.fail_first,
        }
    }
}

impl<T> Default for RecordingHandler<T> {
    fn default() -> Self {
        Self::failing_first(0)
    }
}

impl<T> RecordingHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 前 `n` 次调用返回 `Handler` 错误，之后成功
    pub fn failing_first(n: u32) -> Self {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(AtomicU32::new(0)),
            fail_first: n,
        }
    }

    /// 处理成功的记录
    pub fn received(&self) -> Vec<ConsumerRecord<T>>
    where
        T: Clone,
    {
        self.received.lock().clone()
    }

    /// 总调用次数（含失败）
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Payload> RecordHandler<T> for RecordingHandler<T> {
    async fn handle(&self, record: &ConsumerRecord<T>) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(EcommerceError::Handler(format!("预设失败 #{}", call + 1)));
        }
        self.received.lock().push(record.clone());
        Ok(())
    }
}
