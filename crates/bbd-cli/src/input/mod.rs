pub mod file;
pub mod stdin;

use serde::de::DeserializeOwned;

/// Load a typed input from `--input <path>` or piped stdin.
pub fn load<T: DeserializeOwned>(
    input: &Option<String>,
    what: &str,
) -> Result<T, Box<dyn std::error::Error>> {
    if let Some(path) = input {
        return file::read_input(path);
    }
    if let Some(data) = stdin::read_stdin()? {
        return Ok(serde_json::from_value(data)?);
    }
    Err(format!("--input <file.json|file.yaml> or stdin required for {what}").into())
}
