//! 统一错误处理模块
//!
//! 定义发布/订阅客户端层共享的错误类型，使用 thiserror 提供良好的错误信息。
//! 错误按传播范围分为三类：
//! - 启动期致命错误（配置缺失、类型无法解析）
//! - 连接期致命错误（终止消费循环，由调用方决定是否重启）
//! - 单条记录错误（反序列化失败、处理器失败），只影响当前记录

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum EcommerceError {
    // ==================== 配置错误 ====================
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("类型描述符无法解析: {descriptor}")]
    UnresolvableType { descriptor: String },

    #[error("配置加载失败: {0}")]
    Config(#[from] config::ConfigError),

    // ==================== 记录级错误 ====================
    #[error("负载格式错误: {0}")]
    MalformedPayload(String),

    #[error("处理器执行失败: {0}")]
    Handler(String),

    // ==================== 连接错误 ====================
    #[error("消息发送失败: {0}")]
    Dispatch(String),

    #[error("日志服务连接错误: {0}")]
    Connection(String),

    #[error("资源已关闭: {resource}")]
    Closed { resource: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, EcommerceError>;

impl EcommerceError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::UnresolvableType { .. } => "UNRESOLVABLE_TYPE",
            Self::Config(_) => "CONFIG_LOAD_ERROR",
            Self::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            Self::Handler(_) => "HANDLER_FAILURE",
            Self::Dispatch(_) => "DISPATCH_ERROR",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::Closed { .. } => "CLOSED_RESOURCE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 只有处理器失败会在消费循环内被重试。负载格式错误重试也不会成功；
    /// 发送失败交由调用方决定，避免非幂等发送产生重复消息。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Handler(_))
    }

    /// 是否会终止所属组件
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_)
                | Self::UnresolvableType { .. }
                | Self::Config(_)
                | Self::Connection(_)
        )
    }

    pub fn closed(resource: impl Into<String>) -> Self {
        Self::Closed {
            resource: resource.into(),
        }
    }
}
