//! 负载编解码
//!
//! 每种负载类型通过 [`Payload::TYPE_NAME`] 声明自己的类型描述符，
//! 进程启动时把需要的类型登记到 [`TypeRegistry`]。
//! [`JsonCodec`] 在配置阶段把选项中的 `type_descriptor` 解析为已登记的类型，
//! 之后只负责 JSON 与该类型之间的转换。

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{ClientOptions, keys};
use crate::error::{EcommerceError, Result};

/// 可经由日志传输的负载类型
pub trait Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// 类型描述符，写入配置的 `type_descriptor` 选项
    const TYPE_NAME: &'static str;
}

impl Payload for String {
    const TYPE_NAME: &'static str = "java.lang.String";
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// 已登记的负载类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeEntry {
    pub descriptor: &'static str,
    pub type_id: TypeId,
    pub rust_type: &'static str,
}

/// 类型描述符到具体类型的静态登记表
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    entries: HashMap<&'static str, TypeEntry>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记负载类型；重复登记同一描述符时以后者为准
    pub fn register<T: Payload>(mut self) -> Self {
        self.entries.insert(
            T::TYPE_NAME,
            TypeEntry {
                descriptor: T::TYPE_NAME,
                type_id: TypeId::of::<T>(),
                rust_type: type_name::<T>(),
            },
        );
        self
    }

    pub fn resolve(&self, descriptor: &str) -> Result<&TypeEntry> {
        self.entries
            .get(descriptor)
            .ok_or_else(|| EcommerceError::UnresolvableType {
                descriptor: descriptor.to_string(),
            })
    }

    pub fn contains(&self, descriptor: &str) -> bool {
        self.entries.contains_key(descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// 基于 serde_json 的负载编解码器
///
/// 只能通过 [`JsonCodec::configure`] 构造，构造后绑定的类型不可变。
#[derive(Debug)]
pub struct JsonCodec<T> {
    entry: TypeEntry,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry,
            _marker: PhantomData,
        }
    }
}

impl<T: Payload> JsonCodec<T> {
    /// 根据选项中的 `type_descriptor` 解析负载类型
    ///
    /// - 缺少描述符：配置错误
    /// - 描述符未登记：类型无法解析
    /// - 描述符登记的类型与 `T` 不一致：配置错误
    pub fn configure(options: &ClientOptions, registry: &TypeRegistry) -> Result<Self> {
        let descriptor = options.required(keys::TYPE_DESCRIPTOR)?;
        let entry = *registry.resolve(descriptor)?;

        if entry.type_id != TypeId::of::<T>() {
            return Err(EcommerceError::Configuration(format!(
                "类型描述符 `{descriptor}` 对应 {}，与期望的 {} 不一致",
                entry.rust_type,
                type_name::<T>()
            )));
        }

        Ok(Self {
            entry,
            _marker: PhantomData,
        })
    }

    pub fn descriptor(&self) -> &'static str {
        self.entry.descriptor
    }

    pub fn serialize(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| {
            EcommerceError::MalformedPayload(format!("{} 序列化失败: {e}", self.entry.descriptor))
        })
    }

    /// 反序列化负载；缺失或空负载视为墓碑记录，返回 `None`
    pub fn deserialize(&self, bytes: Option<&[u8]>) -> Result<Option<T>> {
        match bytes {
            None => Ok(None),
            Some(bytes) if bytes.is_empty() => Ok(None),
            Some(bytes) => serde_json::from_slice(bytes).map(Some).map_err(|e| {
                EcommerceError::MalformedPayload(format!(
                    "无法解析为 {}: {e}",
                    self.entry.descriptor
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Payload for Ping {
        const TYPE_NAME: &'static str = "test.Ping";
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::new().register::<Ping>().register::<String>()
    }

    fn options(descriptor: &str) -> ClientOptions {
        ClientOptions::new().with(keys::TYPE_DESCRIPTOR, descriptor)
    }

    #[test]
    fn test_round_trip() {
        let codec = JsonCodec::<Ping>::configure(&options("test.Ping"), &registry()).unwrap();
        let value = Ping { seq: 7 };

        let bytes = codec.serialize(&value).unwrap();
        assert_eq!(codec.deserialize(Some(bytes.as_slice())).unwrap(), Some(value));
    }

    #[test]
    fn test_missing_descriptor_is_configuration_error() {
        let err = JsonCodec::<Ping>::configure(&ClientOptions::new(), &registry()).unwrap_err();
        assert!(matches!(err, EcommerceError::Configuration(_)));
    }

    #[test]
    fn test_unknown_descriptor_is_unresolvable() {
        let err =
            JsonCodec::<Ping>::configure(&options("test.DoesNotExist"), &registry()).unwrap_err();
        assert!(matches!(
            err,
            EcommerceError::UnresolvableType { ref descriptor } if descriptor == "test.DoesNotExist"
        ));
    }

    #[test]
    fn test_descriptor_for_other_type_is_rejected() {
        let err =
            JsonCodec::<Ping>::configure(&options(String::TYPE_NAME), &registry()).unwrap_err();
        assert!(matches!(err, EcommerceError::Configuration(_)));
    }

    #[test]
    fn test_empty_payload_is_tombstone() {
        let codec = JsonCodec::<Ping>::configure(&options("test.Ping"), &registry()).unwrap();
        assert_eq!(codec.deserialize(None).unwrap(), None);
        assert_eq!(codec.deserialize(Some(b"".as_slice())).unwrap(), None);
    }

    #[test]
    fn test_malformed_payload() {
        let codec = JsonCodec::<Ping>::configure(&options("test.Ping"), &registry()).unwrap();
        let err = codec.deserialize(Some(br#"{"seq": "x"}"#.as_slice())).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_PAYLOAD");
    }
}
