//! 共享库
//!
//! 电商各服务共用的类型化发布/订阅层：负载编解码、Dispatcher、消费循环，
//! 以及配置、错误处理、日志指标等基础设施代码。

pub mod codec;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod kafka;
pub mod observability;
pub mod retry;
pub mod service;
pub mod signal;
pub mod test_utils;

pub use codec::{JsonCodec, Payload, TypeRegistry};
pub use config::{AppConfig, ClientOptions};
pub use dispatcher::{KafkaDispatcher, SendHandle};
pub use error::{EcommerceError, Result};
pub use service::{
    ConsumerRecord, KafkaService, RecordHandler, ServiceHandle, ServiceReport, ServiceState,
    handler_fn,
};
