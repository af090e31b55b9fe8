use serde_json::Value;
use std::io::{self, Read};

/// Attempt to read a piped config from stdin.
/// Returns None if stdin is a TTY (interactive).
///
/// Stdin has no file extension to dispatch on, so the buffer is parsed as
/// JSON first and as YAML when that fails, keeping piped input consistent
/// with what `--input` accepts.
pub fn read_stdin() -> Result<Option<Value>, Box<dyn std::error::Error>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;

    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(json_err) => serde_yaml::from_str(trimmed)
            .map_err(|yaml_err| format!("stdin is neither JSON ({json_err}) nor YAML ({yaml_err})"))?,
    };
    Ok(Some(value))
}
