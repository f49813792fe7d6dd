//! 欺诈检测服务错误类型

use ecommerce_shared::error::EcommerceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FraudError {
    #[error(transparent)]
    Shared(#[from] EcommerceError),
}

impl FraudError {
    /// 是否应终止进程
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Shared(e) => e.is_fatal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_error_is_transparent() {
        let err: FraudError = EcommerceError::Connection("all brokers down".to_string()).into();
        assert_eq!(err.to_string(), "日志服务连接错误: all brokers down");
        assert!(err.is_fatal());
    }
}
