//! 新订单服务错误类型

use ecommerce_shared::error::EcommerceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("订单发送失败: order_id={order_id}, 原因={source}")]
    OrderDispatch {
        order_id: String,
        source: EcommerceError,
    },

    #[error("感谢邮件发送失败: user_id={user_id}, 原因={source}")]
    EmailDispatch {
        user_id: String,
        source: EcommerceError,
    },

    #[error(transparent)]
    Shared(#[from] EcommerceError),
}
