//! 邮件服务
//!
//! 以 `EmailService` 消费组订阅待发送邮件，逐封模拟发送。

pub mod error;
pub mod sender;

pub use error::EmailError;
pub use sender::{EmailSender, GROUP_NAME};
