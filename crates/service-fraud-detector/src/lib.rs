//! 欺诈检测服务
//!
//! 以 `FraudDetectorService` 消费组订阅新订单，逐条检查后记录处理结果。

pub mod detector;
pub mod error;

pub use detector::{FraudDetector, GROUP_NAME};
pub use error::FraudError;
