//! 电商事件模型
//!
//! 各服务之间交换的负载类型与 topic 名称。

use serde::{Deserialize, Serialize};

use crate::codec::{Payload, TypeRegistry};

/// 集中管理所有 topic 名称，防止字符串散落在各服务中导致拼写不一致
pub mod topics {
    pub const NEW_ORDER: &str = "ECOMMERCE_NEW_ORDER";
    pub const SEND_EMAIL: &str = "ECOMMERCE_SEND_EMAIL";
}

/// 新订单
///
/// 字段名使用 camelCase，与既有生产者写出的 JSON 保持一致。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub user_id: String,
    pub order_id: String,
    pub amount: f64,
}

impl Order {
    pub fn new(user_id: impl Into<String>, order_id: impl Into<String>, amount: f64) -> Self {
        Self {
            user_id: user_id.into(),
            order_id: order_id.into(),
            amount,
        }
    }
}

impl Payload for Order {
    const TYPE_NAME: &'static str = "br.com.alura.ecommerce.Order";
}

/// 登记所有服务用到的负载类型
pub fn default_registry() -> TypeRegistry {
    TypeRegistry::new().register::<Order>().register::<String>()
}
