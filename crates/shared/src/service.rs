//! 类型化消费循环
//!
//! `KafkaService` 以一个消费组身份订阅一个 topic，循环拉取记录、解码为 `T`，
//! 交给处理器执行。状态流转：`Created -> Running -> Stopping -> Closed`。
//!
//! 单条记录的失败只影响该记录：
//! - 负载无法解析：记录日志后跳过，不重试
//! - 处理器失败：按重试策略重新调用，全部失败后记录日志并跳过
//!
//! 无论处理结果如何都会提交位点，保证循环向前推进。永久失败的记录不会进入
//! 死信队列，而是在日志中留下记录后被丢弃。
//!
//! 连接级错误会终止 `run`，由调用方决定是否重建服务。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::codec::{JsonCodec, Payload, TypeRegistry};
use crate::config::{ClientOptions, KafkaConfig, keys};
use crate::dispatcher::with_default_descriptor;
use crate::error::{EcommerceError, Result};
use crate::kafka::{KafkaLogConsumer, LogConsumer, RawRecord};
use crate::observability::metrics;
use crate::retry::{RetryPolicy, retry_with_policy};

// ---------------------------------------------------------------------------
// ConsumerRecord / RecordHandler
// ---------------------------------------------------------------------------

/// 解码后的记录
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerRecord<T> {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    /// 墓碑记录为 `None`
    pub value: Option<T>,
    pub timestamp: Option<i64>,
}

impl<T> ConsumerRecord<T> {
    fn decoded(raw: &RawRecord, value: Option<T>) -> Self {
        Self {
            topic: raw.topic.clone(),
            partition: raw.partition,
            offset: raw.offset,
            key: raw.key.clone(),
            value,
            timestamp: raw.timestamp,
        }
    }
}

/// 记录处理器
///
/// 返回错误即视为本次调用失败，消费循环会按重试策略再次调用；
/// 返回值不做其他解释。调用不会被中途取消，实现需保证在有限时间内完成。
#[async_trait]
pub trait RecordHandler<T: Payload>: Send + Sync {
    async fn handle(&self, record: &ConsumerRecord<T>) -> Result<()>;
}

/// 闭包处理器适配，见 [`handler_fn`]
pub struct HandlerFn<F>(F);

/// 把 `Fn(ConsumerRecord<T>) -> Future` 闭包包装为处理器
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn(f)
}

#[async_trait]
impl<T, F, Fut> RecordHandler<T> for HandlerFn<F>
where
    T: Payload,
    F: Fn(ConsumerRecord<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn handle(&self, record: &ConsumerRecord<T>) -> Result<()> {
        (self.0)(record.clone()).await
    }
}

// ---------------------------------------------------------------------------
// 设置与统计
// ---------------------------------------------------------------------------

/// 消费循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Created,
    Running,
    Stopping,
    Closed,
}

/// 消费循环参数
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceSettings {
    pub poll_timeout: Duration,
    pub max_poll_records: usize,
    pub retry: RetryPolicy,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(100),
            max_poll_records: 1,
            retry: RetryPolicy::default(),
        }
    }
}

impl ServiceSettings {
    pub fn from_options(options: &ClientOptions) -> Result<Self> {
        let defaults = Self::default();
        let max_poll_records = options.parse_or(keys::MAX_POLL_RECORDS, defaults.max_poll_records)?;
        if max_poll_records == 0 {
            return Err(EcommerceError::Configuration(format!(
                "选项 `{}` 必须大于 0",
                keys::MAX_POLL_RECORDS
            )));
        }

        Ok(Self {
            poll_timeout: options.duration_ms_or(keys::POLL_TIMEOUT, defaults.poll_timeout)?,
            max_poll_records,
            retry: RetryPolicy::from_options(options)?,
        })
    }
}

/// 消费循环运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceReport {
    /// 拉取到的记录数
    pub polled: u64,
    /// 处理成功的记录数
    pub succeeded: u64,
    /// 重试耗尽后被跳过的记录数
    pub failed: u64,
    /// 负载无法解析而被跳过的记录数
    pub skipped: u64,
    /// 处理器返回错误的调用次数
    pub failed_attempts: u64,
}

// ---------------------------------------------------------------------------
// ConsumerLease — 连接与消费组成员身份的作用域守卫
// ---------------------------------------------------------------------------

/// 独占消费端连接，保证释放逻辑在任何退出路径上只执行一次
struct ConsumerLease {
    consumer: Option<Box<dyn LogConsumer>>,
    state: Arc<watch::Sender<ServiceState>>,
    group: String,
    topic: String,
}

impl ConsumerLease {
    fn consumer_mut(&mut self) -> Result<&mut Box<dyn LogConsumer>> {
        let topic = &self.topic;
        self.consumer
            .as_mut()
            .ok_or_else(|| EcommerceError::closed(format!("consumer<{topic}>")))
    }

    fn transition(&self, next: ServiceState) {
        self.state.send_replace(next);
    }

    fn mark_stopping(&self) {
        mark_stopping(&self.state);
    }

    /// 退出消费组并释放连接；返回本次调用是否真正执行了释放
    fn release(&mut self) -> bool {
        let Some(mut consumer) = self.consumer.take() else {
            return false;
        };

        if let Err(e) = consumer.close() {
            warn!(group = %self.group, topic = %self.topic, error = %e, "释放消费者连接出错");
        }
        drop(consumer);

        self.transition(ServiceState::Closed);
        info!(group = %self.group, topic = %self.topic, "消费循环已关闭");
        true
    }
}

impl Drop for ConsumerLease {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// ServiceHandle
// ---------------------------------------------------------------------------

/// 只有运行中的循环才进入 `Stopping`
fn mark_stopping(state: &watch::Sender<ServiceState>) {
    state.send_if_modified(|s| {
        if *s == ServiceState::Running {
            *s = ServiceState::Stopping;
            true
        } else {
            false
        }
    });
}

/// 消费循环的控制句柄，可在其他任务中请求停止
#[derive(Clone)]
pub struct ServiceHandle {
    stop: Arc<watch::Sender<bool>>,
    state: Arc<watch::Sender<ServiceState>>,
}

impl ServiceHandle {
    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// 请求停止，不等待
    ///
    /// 运行中的循环立即进入 `Stopping`，正在处理的批次仍会处理完毕。
    pub fn request_stop(&self) {
        self.stop.send_replace(true);
        mark_stopping(&self.state);
    }

    /// 请求停止并等待连接释放
    ///
    /// 当前批次会处理完毕后才停止。可重复调用。
    ///
    /// 连接由 [`KafkaService`] 持有：服务尚未运行时，要等到它被运行、
    /// [`KafkaService::close`] 或销毁后才会返回。
    pub async fn close(&self) {
        self.request_stop();
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == ServiceState::Closed).await;
    }
}

// ---------------------------------------------------------------------------
// KafkaService
// ---------------------------------------------------------------------------

/// 类型化消费循环
pub struct KafkaService<T, H> {
    codec: JsonCodec<T>,
    handler: H,
    settings: ServiceSettings,
    lease: ConsumerLease,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl<T, H> KafkaService<T, H>
where
    T: Payload,
    H: RecordHandler<T>,
{
    /// 连接 Kafka，加入消费组并订阅 topic
    ///
    /// `group_name` 为空时从选项 `group_name` 读取；`type_descriptor` 缺省为
    /// `T::TYPE_NAME`。其余未识别的选项透传给 Kafka 客户端。
    pub fn new(
        config: &KafkaConfig,
        group_name: &str,
        topic: &str,
        handler: H,
        options: &ClientOptions,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        let options = with_default_descriptor::<T>(options);
        let group = resolve_group(group_name, &options)?;
        let codec = JsonCodec::configure(&options, registry)?;
        let settings = ServiceSettings::from_options(&options)?;
        let consumer = KafkaLogConsumer::new(config, &group, topic, &options)?;

        Ok(Self::assemble(
            group,
            topic,
            handler,
            codec,
            settings,
            Box::new(consumer),
        ))
    }

    /// 使用现成的消费端连接创建服务
    pub fn with_consumer(
        group_name: &str,
        topic: &str,
        handler: H,
        options: &ClientOptions,
        registry: &TypeRegistry,
        consumer: Box<dyn LogConsumer>,
    ) -> Result<Self> {
        let options = with_default_descriptor::<T>(options);
        let group = resolve_group(group_name, &options)?;
        let codec = JsonCodec::configure(&options, registry)?;
        let settings = ServiceSettings::from_options(&options)?;

        Ok(Self::assemble(group, topic, handler, codec, settings, consumer))
    }

    fn assemble(
        group: String,
        topic: &str,
        handler: H,
        codec: JsonCodec<T>,
        settings: ServiceSettings,
        consumer: Box<dyn LogConsumer>,
    ) -> Self {
        let (state, _) = watch::channel(ServiceState::Created);
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            group = %group,
            topic,
            type_descriptor = codec.descriptor(),
            poll_timeout_ms = settings.poll_timeout.as_millis() as u64,
            retry_count = settings.retry.max_retries,
            "消费循环已创建"
        );

        Self {
            codec,
            handler,
            settings,
            lease: ConsumerLease {
                consumer: Some(consumer),
                state: Arc::new(state),
                group,
                topic: topic.to_string(),
            },
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    pub fn group(&self) -> &str {
        &self.lease.group
    }

    pub fn topic(&self) -> &str {
        &self.lease.topic
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            stop: self.stop_tx.clone(),
            state: self.lease.state.clone(),
        }
    }

    /// 关闭从未运行过的服务
    pub fn close(mut self) {
        self.lease.release();
    }

    /// 在独立任务上运行消费循环
    pub fn spawn(self) -> (ServiceHandle, JoinHandle<Result<ServiceReport>>)
    where
        H: 'static,
    {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    /// 在独立任务上运行，`shutdown` 完成时请求停止并等待退出
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<ServiceReport>
    where
        H: 'static,
    {
        let (handle, mut task) = self.spawn();

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = shutdown => {
                handle.close().await;
                task.await
            }
        };
        joined.map_err(|e| EcommerceError::Internal(format!("消费任务异常退出: {e}")))?
    }

    /// 运行消费循环，直到收到停止请求或发生连接错误
    ///
    /// 两种情况下都会先释放连接再返回。
    pub async fn run(mut self) -> Result<ServiceReport> {
        let mut report = ServiceReport::default();

        self.lease.transition(ServiceState::Running);
        info!(group = %self.lease.group, topic = %self.lease.topic, "消费循环已启动");

        let result = self.poll_loop(&mut report).await;

        self.lease.mark_stopping();
        self.lease.release();

        match result {
            Ok(()) => {
                info!(
                    group = %self.lease.group,
                    topic = %self.lease.topic,
                    ?report,
                    "消费循环正常退出"
                );
                Ok(report)
            }
            Err(e) => {
                error!(
                    group = %self.lease.group,
                    topic = %self.lease.topic,
                    error = %e,
                    "消费循环因连接错误终止"
                );
                Err(e)
            }
        }
    }

    async fn poll_loop(&mut self, report: &mut ServiceReport) -> Result<()> {
        loop {
            if *self.stop_rx.borrow_and_update() {
                self.lease.mark_stopping();
                info!(group = %self.lease.group, topic = %self.lease.topic, "收到停止请求");
                return Ok(());
            }

            let poll_timeout = self.settings.poll_timeout;
            let max_records = self.settings.max_poll_records;
            let consumer = self.lease.consumer_mut()?;

            let batch = tokio::select! {
                // 偏向停止信号，保证收到停止时能尽快退出
                biased;

                _ = self.stop_rx.changed() => continue,

                batch = consumer.poll_batch(poll_timeout, max_records) => batch?,
            };

            report.polled += batch.len() as u64;

            // 当前批次总是处理完毕，停止请求在下一轮开始时生效
            for raw in &batch {
                process_record(
                    &self.codec,
                    &self.handler,
                    &self.settings.retry,
                    &self.lease.group,
                    raw,
                    report,
                )
                .await;
                self.lease.consumer_mut()?.commit(raw)?;
            }
        }
    }
}

/// 解码并处理单条记录
///
/// 只接收需要的字段：`LogConsumer` 不是 `Sync`，不能跨 await 持有 `&KafkaService`。
async fn process_record<T, H>(
    codec: &JsonCodec<T>,
    handler: &H,
    retry: &RetryPolicy,
    group: &str,
    raw: &RawRecord,
    report: &mut ServiceReport,
) where
    T: Payload,
    H: RecordHandler<T>,
{
    let value = match codec.deserialize(raw.payload.as_deref()) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                group,
                topic = %raw.topic,
                partition = raw.partition,
                offset = raw.offset,
                error = %e,
                "负载无法解析，跳过该记录"
            );
            report.skipped += 1;
            metrics::record_consumed(&raw.topic, group, "malformed");
            return;
        }
    };

    let record = ConsumerRecord::decoded(raw, value);
    let record = &record;

    let outcome = retry_with_policy(
        retry,
        "record_handler",
        |_: &EcommerceError| true,
        move || handler.handle(record),
    )
    .await;

    report.failed_attempts += u64::from(outcome.failed_attempts);
    if outcome.failed_attempts > 0 {
        metrics::record_handler_failures(&raw.topic, group, outcome.failed_attempts);
    }

    match outcome.result {
        Ok(()) => {
            report.succeeded += 1;
            metrics::record_consumed(&raw.topic, group, "success");
        }
        Err(e) => {
            error!(
                group,
                topic = %raw.topic,
                partition = raw.partition,
                offset = raw.offset,
                key = ?raw.key,
                attempts = outcome.failed_attempts,
                error = %e,
                "记录处理失败且重试已耗尽，跳过该记录"
            );
            report.failed += 1;
            metrics::record_consumed(&raw.topic, group, "failed");
        }
    }
}

fn resolve_group(group_name: &str, options: &ClientOptions) -> Result<String> {
    if !group_name.trim().is_empty() {
        return Ok(group_name.to_string());
    }
    options.required(keys::GROUP_NAME).map(str::to_string)
}
