//! Task trait - 型付き Task の定義
//!
//! task は「登録済み handler 名 + プリミティブ引数のリスト」として永続化されます。
//! 型 `T` は serde で引数リストに変換されます:
//!
//! | `T` の serde 表現          | 引数リスト      |
//! |----------------------------|-----------------|
//! | tuple struct / 配列        | 各要素          |
//! | newtype / プリミティブ      | 1 要素          |
//! | unit struct (`null`)       | 空              |
//! | named-field struct / map   | `InvalidArgs`   |

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::domain::{Arg, ValidationError};

/// Task は task_type と引数の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Transcode(i64, String);
///
/// impl Task for Transcode {
///     const TYPE: &'static str = "video.transcode.v1";
/// }
/// ```
///
/// # 命名規約
/// - `{domain}.{action}.v{major}`（空白・制御文字は不可）
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    fn to_args(&self) -> Result<Vec<Arg>, ValidationError> {
        let value = serde_json::to_value(self)
            .map_err(|e| ValidationError::InvalidArgs(e.to_string()))?;
        args_from_value(value)
    }
}

/// Flatten a serde value into a primitive argument list.
pub fn args_from_value(value: Value) -> Result<Vec<Arg>, ValidationError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| {
                Arg::from_json(item).ok_or_else(|| {
                    ValidationError::InvalidArgs(format!("argument {item} is not a primitive"))
                })
            })
            .collect(),
        Value::Object(_) => Err(ValidationError::InvalidArgs(
            "named fields are not positional arguments".to_string(),
        )),
        primitive => Arg::from_json(&primitive)
            .map(|arg| vec![arg])
            .ok_or_else(|| ValidationError::InvalidArgs(format!("argument {primitive} is not a primitive"))),
    }
}

/// Decode an argument list back into `T`.
///
/// Tries the list form first, then the single-value and unit forms so that
/// newtype and unit tasks round-trip.
pub fn decode_args<T: DeserializeOwned>(args: &[Arg]) -> Result<T, serde_json::Error> {
    let list = Value::Array(args.iter().map(Arg::to_json).collect());
    match serde_json::from_value(list) {
        Ok(task) => Ok(task),
        Err(err) => match args {
            [] => serde_json::from_value(Value::Null).map_err(|_| err),
            [single] => serde_json::from_value(single.to_json()).map_err(|_| err),
            _ => Err(err),
        },
    }
}
