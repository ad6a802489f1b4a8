//! 工具参数 Schema 与类型化解析
//!
//! 每个工具用一个 `#[derive(Deserialize, JsonSchema)]` 参数结构体描述参数：
//! schemars 生成提供给模型的 JSON Schema，serde 在执行前把模型给出的 JSON 解析为该结构体。

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

/// 生成参数 JSON Schema（去掉 `$schema` / `title` 等元信息，保证有 properties）
pub fn args_schema<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
        obj.entry("type").or_insert_with(|| json!("object"));
        obj.entry("properties").or_insert_with(|| json!({}));
    }
    value
}

/// 将模型给出的参数解析为类型化结构体；null 视为空对象
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    let args = if args.is_null() { json!({}) } else { args };
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))
}
