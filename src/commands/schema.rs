//! 命令参数 JSON Schema 生成与解码（schemars 自动生成，字段文档注释即为 description）
//!
//! 生成的 schema 作为 function 的 parameters 暴露给模型；解码失败统一映射为 ArgumentDecode。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::AgentError;

/// 返回参数类型的 JSON Schema（去掉 `$schema` / `title` 等模型不需要的元信息）
pub fn parameters_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| empty_object_schema());
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        if map
            .get("definitions")
            .and_then(|d| d.as_object())
            .is_some_and(|d| d.is_empty())
        {
            map.remove("definitions");
        }
    }
    value
}

fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// 按 schema 解码模型给出的原始参数文本；空文本视为 `{}`
pub fn decode_args<T: DeserializeOwned>(command: &str, raw: &str) -> Result<T, AgentError> {
    let raw = if raw.trim().is_empty() { "{}" } else { raw };
    serde_json::from_str(raw).map_err(|e| AgentError::ArgumentDecode {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
    struct Sample {
        /// The file to write to
        filename: String,
        content: Option<String>,
    }

    #[test]
    fn test_schema_shape() {
        let schema = parameters_schema::<Sample>();
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("title").is_none());
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], serde_json::json!(["filename"]));
        assert_eq!(
            schema["properties"]["filename"]["description"],
            "The file to write to"
        );
    }

    #[test]
    fn test_decode_errors() {
        let err = decode_args::<Sample>("WRITE", "{invalid").unwrap_err();
        assert_eq!(err.kind(), "ArgumentDecodeError");

        let err = decode_args::<Sample>("WRITE", r#"{"content":"x"}"#).unwrap_err();
        assert!(err.to_string().contains("filename"));

        let ok: Sample = decode_args("WRITE", r#"{"filename":"a.txt"}"#).unwrap();
        assert_eq!(ok.content, None);
    }
}
