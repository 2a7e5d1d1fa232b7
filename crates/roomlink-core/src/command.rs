use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::CommandError;

/// A named operation with an argument bag, as received from the host.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), arguments: Map::new() }
    }

    /// Build a command from any JSON-serializable argument bag.
    /// Non-object arguments become an empty bag.
    pub fn with_args(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { name: name.into(), arguments }
    }

    pub fn args(&self) -> Args<'_> {
        Args(&self.arguments)
    }
}

/// Exactly one result per dispatched command: a JSON value on success, a
/// typed error otherwise.
pub type CommandResult = Result<Value, CommandError>;

/// Typed view over a command's argument bag.
///
/// Untyped input is converted into strongly-typed arguments here, once, at
/// the dispatch boundary. A missing required argument or an argument of the
/// wrong type is rejected before any state mutation or engine call.
pub struct Args<'a>(&'a Map<String, Value>);

impl<'a> Args<'a> {
    /// Required string argument.
    pub fn str(&self, key: &str) -> Result<&'a str, CommandError> {
        match self.0.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(_) => Err(mistyped(key, "string")),
            None => Err(missing(key)),
        }
    }

    /// Required non-empty string argument.
    pub fn non_empty_str(&self, key: &str) -> Result<&'a str, CommandError> {
        let s = self.str(key)?;
        if s.is_empty() {
            return Err(CommandError::invalid_argument(format!("`{key}` must not be empty")));
        }
        Ok(s)
    }

    /// Optional string argument; `None` when absent or JSON null.
    pub fn opt_str(&self, key: &str) -> Result<Option<&'a str>, CommandError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(mistyped(key, "string")),
        }
    }

    pub fn str_or(&self, key: &str, default: &'a str) -> Result<&'a str, CommandError> {
        Ok(self.opt_str(key)?.unwrap_or(default))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, CommandError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(mistyped(key, "bool")),
        }
    }

    pub fn i32_or(&self, key: &str, default: i32) -> Result<i32, CommandError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => n
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| mistyped(key, "integer")),
            Some(_) => Err(mistyped(key, "integer")),
        }
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, CommandError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| mistyped(key, "integer")),
            Some(_) => Err(mistyped(key, "integer")),
        }
    }

    /// Binary payload encoded as a JSON array of byte values.
    pub fn bytes_or_empty(&self, key: &str) -> Result<Vec<u8>, CommandError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_i64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| mistyped(key, "byte array"))
                })
                .collect(),
            Some(_) => Err(mistyped(key, "byte array")),
        }
    }

    /// Deserialize the whole bag into a typed config struct. Unknown keys
    /// are ignored; missing keys take the struct's serde defaults; a key of
    /// the wrong type is rejected.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CommandError> {
        serde_json::from_value(Value::Object(self.0.clone()))
            .map_err(|e| CommandError::invalid_argument(e.to_string()))
    }
}

fn missing(key: &str) -> CommandError {
    CommandError::invalid_argument(format!("`{key}` is required"))
}

fn mistyped(key: &str, expected: &str) -> CommandError {
    CommandError::invalid_argument(format!("`{key}` must be a {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cmd(args: Value) -> Command {
        Command::with_args("test", args)
    }

    #[test]
    fn required_str_present() {
        let c = cmd(json!({"channelId": "c1"}));
        assert_eq!(c.args().str("channelId").unwrap(), "c1");
    }

    #[test]
    fn required_str_missing_or_mistyped() {
        let c = cmd(json!({"uid": 42}));
        assert!(c.args().str("channelId").is_err());
        assert!(c.args().str("uid").is_err());
    }

    #[test]
    fn non_empty_str_rejects_empty() {
        let c = cmd(json!({"appId": ""}));
        assert!(c.args().non_empty_str("appId").is_err());
    }

    #[test]
    fn optional_args_take_defaults() {
        let c = cmd(json!({}));
        let args = c.args();
        assert!(args.bool_or("muted", false).unwrap() == false);
        assert_eq!(args.i32_or("volume", 100).unwrap(), 100);
        assert_eq!(args.str_or("quality", "high").unwrap(), "high");
        assert!(args.opt_str("apiBaseUrl").unwrap().is_none());
    }

    #[test]
    fn optional_args_reject_wrong_type() {
        let c = cmd(json!({"muted": "yes", "volume": "loud"}));
        assert!(c.args().bool_or("muted", false).is_err());
        assert!(c.args().i32_or("volume", 100).is_err());
    }

    #[test]
    fn null_counts_as_absent() {
        let c = cmd(json!({"token": null}));
        assert!(c.args().opt_str("token").unwrap().is_none());
        assert!(c.args().bool_or("token", true).unwrap());
    }

    #[test]
    fn bytes_from_number_array() {
        let c = cmd(json!({"data": [1, 2, 255]}));
        assert_eq!(c.args().bytes_or_empty("data").unwrap(), vec![1, 2, 255]);

        let bad = cmd(json!({"data": [1, 999]}));
        assert!(bad.args().bytes_or_empty("data").is_err());
    }

    #[test]
    fn non_object_arguments_become_empty_bag() {
        let c = Command::with_args("test", json!([1, 2, 3]));
        assert!(c.arguments.is_empty());
    }
}
