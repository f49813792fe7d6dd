//! 新订单服务
//!
//! 生成随机订单写入新订单 topic，并为每个订单发送一封感谢邮件。

pub mod error;
pub mod generator;

pub use error::OrderError;
pub use generator::{OrderGenerator, THANK_YOU_EMAIL};
