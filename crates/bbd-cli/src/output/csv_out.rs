use serde_json::Value;
use std::io;

/// Write output as CSV to stdout.
///
/// Arrays of per-year records (percentile bands, margin-call stats,
/// projection years) become proper row CSV; scalar results become
/// field/value pairs.
pub fn print_csv(value: &Value) {
    let stdout = io::stdout();
    let mut wtr = csv::Writer::from_writer(stdout.lock());

    match value {
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                // Prefer the first per-year array inside the result
                if let Some((name, rows)) = first_record_array(result) {
                    let _ = wtr.write_record([format!("# {name}")]);
                    write_array_csv(&mut wtr, rows);
                } else {
                    write_object_csv(&mut wtr, result);
                }
            } else {
                write_object_csv(&mut wtr, value);
            }
        }
        Value::Array(arr) => write_array_csv(&mut wtr, arr),
        _ => {
            let _ = wtr.write_record([format_csv_value(value)]);
        }
    }

    let _ = wtr.flush();
}

fn first_record_array(result: &Value) -> Option<(&str, &Vec<Value>)> {
    let map = result.as_object()?;
    map.iter().find_map(|(k, v)| match v {
        Value::Array(arr) if matches!(arr.first(), Some(Value::Object(_))) => {
            Some((k.as_str(), arr))
        }
        _ => None,
    })
}

fn write_object_csv(wtr: &mut csv::Writer<io::StdoutLock<'_>>, value: &Value) {
    let _ = wtr.write_record(["field", "value"]);
    if let Value::Object(map) = value {
        for (key, val) in map {
            let _ = wtr.write_record([key.as_str(), &format_csv_value(val)]);
        }
    }
}

fn write_array_csv(wtr: &mut csv::Writer<io::StdoutLock<'_>>, arr: &[Value]) {
    if arr.is_empty() {
        return;
    }

    if let Some(Value::Object(first)) = arr.first() {
        let headers = flatten_keys(first);
        let _ = wtr.write_record(&headers);
        for item in arr {
            let row: Vec<String> = headers
                .iter()
                .map(|h| {
                    lookup_path(item, h)
                        .map(|v| format_csv_value(&v))
                        .unwrap_or_default()
                })
                .collect();
            let _ = wtr.write_record(&row);
        }
    }
}

fn flatten_keys(map: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut keys = Vec::new();
    for (key, val) in map {
        match val {
            Value::Object(inner) => {
                for inner_key in inner.keys() {
                    keys.push(format!("{key}.{inner_key}"));
                }
            }
            _ => keys.push(key.clone()),
        }
    }
    keys
}

fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current.clone())
}

fn format_csv_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
