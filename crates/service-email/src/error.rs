//! 邮件服务错误类型

use ecommerce_shared::error::EcommerceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error(transparent)]
    Shared(#[from] EcommerceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_error_is_transparent() {
        let err: EmailError = EcommerceError::closed("consumer<ECOMMERCE_SEND_EMAIL>").into();
        assert_eq!(err.to_string(), "资源已关闭: consumer<ECOMMERCE_SEND_EMAIL>");
    }
}
