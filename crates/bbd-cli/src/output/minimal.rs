use serde_json::Value;

/// Print just the key answer value from the output.
///
/// Heuristic: look for well-known result fields in order of priority,
/// then fall back to the first scalar in the result object.
pub fn print_minimal(value: &Value) {
    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    // Priority paths into simulation / analysis outputs
    let priority_paths = [
        "statistics.median",
        "bbd_advantage",
        "salary_equivalent",
        "depletion_probability",
        "cagr",
        "net_estate",
    ];

    for path in &priority_paths {
        if let Some(val) = lookup_path(result_obj, path) {
            if !val.is_null() {
                println!("{}", format_minimal(&val));
                return;
            }
        }
    }

    if let Value::Object(map) = result_obj {
        if let Some((_, val)) = map
            .iter()
            .find(|(_, v)| !matches!(v, Value::Array(_) | Value::Object(_)))
        {
            println!("{}", format_minimal(val));
            return;
        }
    }
    println!("{}", format_minimal(result_obj));
}

fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
