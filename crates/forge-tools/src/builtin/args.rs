use forge_core::{Error, Result};
use serde_json::Value;

pub fn bad_args(tool: &str, detail: impl Into<String>) -> Error {
    Error::BadArguments { tool: tool.into(), detail: detail.into() }
}

pub fn str_field<'a>(args: &'a Value, tool: &str, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| bad_args(tool, format!("missing string field '{name}'")))
}

pub fn opt_str_field<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name).and_then(Value::as_str)
}

pub fn u64_field(args: &Value, tool: &str, name: &str) -> Result<u64> {
    args.get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| bad_args(tool, format!("missing integer field '{name}'")))
}
