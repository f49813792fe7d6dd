//! 类型化 Dispatcher
//!
//! 每种负载类型一个 Dispatcher，独占一条生产端连接。`send` 同步入队、立即返回
//! 投递句柄：等待句柄即等待日志确认，丢弃句柄即不关心结果。
//! 发送失败不会在内部重试，非幂等发送的重试策略由调用方决定。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{JsonCodec, Payload, TypeRegistry};
use crate::config::{ClientOptions, KafkaConfig, keys};
use crate::error::{EcommerceError, Result};
use crate::kafka::{DeliveryFuture, KafkaLogProducer, LogProducer, OutgoingRecord, RecordPosition};
use crate::observability::metrics;

// ---------------------------------------------------------------------------
// SendHandle
// ---------------------------------------------------------------------------

/// 投递句柄
///
/// 作为 Future 等待时返回日志分配的位置；日志拒绝时返回 `Dispatch` 错误。
#[must_use = "丢弃句柄表示不等待投递确认"]
pub struct SendHandle {
    topic: String,
    key: String,
    delivery: DeliveryFuture,
}

impl SendHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn failed(topic: &str, key: &str, err: EcommerceError) -> Self {
        Self {
            topic: topic.to_string(),
            key: key.to_string(),
            delivery: futures::future::ready(Err(err)).boxed(),
        }
    }
}

impl Future for SendHandle {
    type Output = Result<RecordPosition>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.delivery.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for SendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendHandle")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// KafkaDispatcher
// ---------------------------------------------------------------------------

/// 类型化生产者
///
/// `Send + Sync`，可通过 `Arc` 在多个任务间共享；连接上的写入由内部互斥锁串行化。
pub struct KafkaDispatcher<T> {
    codec: JsonCodec<T>,
    /// `None` 表示已关闭
    producer: Mutex<Option<Box<dyn LogProducer>>>,
    flush_timeout: Duration,
}

impl<T: Payload> KafkaDispatcher<T> {
    /// 连接 Kafka 并创建 Dispatcher
    ///
    /// 未显式给出 `type_descriptor` 时使用 `T::TYPE_NAME`。
    pub fn connect(
        config: &KafkaConfig,
        options: &ClientOptions,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        let options = with_default_descriptor::<T>(options);
        let codec = JsonCodec::configure(&options, registry)?;
        let producer = KafkaLogProducer::new(config, &options)?;
        Ok(Self::with_producer(
            codec,
            Box::new(producer),
            config.flush_timeout(),
        ))
    }

    /// 使用现成的连接创建 Dispatcher
    pub fn with_producer(
        codec: JsonCodec<T>,
        producer: Box<dyn LogProducer>,
        flush_timeout: Duration,
    ) -> Self {
        info!(type_descriptor = codec.descriptor(), "Dispatcher 已创建");
        Self {
            codec,
            producer: Mutex::new(Some(producer)),
            flush_timeout,
        }
    }

    /// 发送一条记录
    ///
    /// 关闭后调用返回 `Closed` 错误；其余失败（序列化、入队、投递）都通过句柄返回。
    pub fn send(&self, topic: &str, key: &str, value: &T) -> Result<SendHandle> {
        let guard = self.producer.lock();
        let Some(producer) = guard.as_ref() else {
            return Err(EcommerceError::closed(format!(
                "dispatcher<{}>",
                self.codec.descriptor()
            )));
        };

        let payload = match self.codec.serialize(value) {
            Ok(payload) => payload,
            Err(e) => return Ok(SendHandle::failed(topic, key, e)),
        };

        let record = OutgoingRecord {
            topic,
            key,
            payload: &payload,
        };

        let delivery = match producer.enqueue(record) {
            Ok(delivery) => delivery,
            Err(e) => {
                warn!(topic, key, error = %e, "消息入队失败");
                metrics::record_dispatch(topic, "rejected");
                return Ok(SendHandle::failed(topic, key, e));
            }
        };
        drop(guard);

        let owned_topic = topic.to_string();
        let owned_key = key.to_string();
        let log_topic = owned_topic.clone();
        let log_key = owned_key.clone();

        let delivery = async move {
            let result = delivery.await;
            match &result {
                Ok(position) => {
                    debug!(
                        topic = %log_topic,
                        key = %log_key,
                        partition = position.partition,
                        offset = position.offset,
                        "消息已确认"
                    );
                    metrics::record_dispatch(&log_topic, "acknowledged");
                }
                Err(e) => {
                    warn!(topic = %log_topic, key = %log_key, error = %e, "消息投递失败");
                    metrics::record_dispatch(&log_topic, "failed");
                }
            }
            result
        }
        .boxed();

        Ok(SendHandle {
            topic: owned_topic,
            key: owned_key,
            delivery,
        })
    }

    /// 发送并等待确认
    pub async fn send_and_wait(&self, topic: &str, key: &str, value: &T) -> Result<RecordPosition> {
        self.send(topic, key, value)?.await
    }

    /// 刷新在途消息并释放连接
    ///
    /// 幂等：只有第一次调用会执行刷新与释放。
    pub fn close(&self) -> Result<()> {
        let Some(producer) = self.producer.lock().take() else {
            return Ok(());
        };

        let flushed = producer.flush(self.flush_timeout);
        drop(producer);

        match &flushed {
            Ok(()) => info!(type_descriptor = self.codec.descriptor(), "Dispatcher 已关闭"),
            Err(e) => warn!(
                type_descriptor = self.codec.descriptor(),
                error = %e,
                "Dispatcher 关闭时在途消息未能全部刷新"
            ),
        }
        flushed
    }

    pub fn is_closed(&self) -> bool {
        self.producer.lock().is_none()
    }
}

/// 未关闭就被销毁时刷新在途消息
///
/// 在 tokio 运行时内销毁时，刷新交给阻塞线程池执行，不占用工作线程。
impl<T> Drop for KafkaDispatcher<T> {
    fn drop(&mut self) {
        let Some(producer) = self.producer.get_mut().take() else {
            return;
        };
        let timeout = self.flush_timeout;
        let flush = move || {
            if let Err(e) = producer.flush(timeout) {
                warn!(error = %e, "Dispatcher 释放时在途消息未能全部刷新");
            }
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(flush);
            }
            Err(_) => flush(),
        }
    }
}

/// 选项中未给出类型描述符时补上 `T::TYPE_NAME`
pub(crate) fn with_default_descriptor<T: Payload>(options: &ClientOptions) -> ClientOptions {
    let mut options = options.clone();
    if options.get(keys::TYPE_DESCRIPTOR).is_none() {
        options.set(keys::TYPE_DESCRIPTOR, T::TYPE_NAME);
    }
    options
}
