use serde_json::Value;
use tabled::{builder::Builder, Table};

/// Format output as tables.
///
/// Simulation envelopes get a dedicated layout: the summary statistics as a
/// field/value table and the yearly bands as one row per year. Anything else
/// falls back to a generic flattened rendering.
pub fn print_table(value: &Value) {
    match value {
        Value::Object(map) => {
            if let Some(result) = map.get("result") {
                print_result(result);
                print_envelope_footer(map);
            } else {
                for (section, inner) in map {
                    println!("== {section} ==");
                    print_table(inner);
                    println!();
                }
            }
        }
        Value::Array(arr) => print_rows(arr),
        _ => println!("{}", value),
    }
}

fn print_result(result: &Value) {
    let Value::Object(map) = result else {
        println!("{}", result);
        return;
    };

    // Scalar fields first
    let mut builder = Builder::default();
    builder.push_record(["Field", "Value"]);
    let mut has_scalars = false;
    for (key, val) in map {
        if !matches!(val, Value::Array(_) | Value::Object(_)) {
            builder.push_record([key.as_str(), &format_value(val)]);
            has_scalars = true;
        }
    }
    if has_scalars {
        println!("{}", Table::from(builder));
    }

    // Nested objects as their own field/value tables, arrays as row tables
    for (key, val) in map {
        match val {
            Value::Object(_) => {
                println!("\n{key}:");
                print_flat_object(val);
            }
            Value::Array(arr) if !arr.is_empty() => {
                println!("\n{key}:");
                print_rows(arr);
            }
            _ => {}
        }
    }
}

fn print_flat_object(value: &Value) {
    if let Value::Object(map) = value {
        let mut builder = Builder::default();
        builder.push_record(["Field", "Value"]);
        for (key, val) in map {
            builder.push_record([key.as_str(), &format_value(val)]);
        }
        println!("{}", Table::from(builder));
    }
}

/// An array of objects becomes one table row per element; yearly bands and
/// margin-call stats land here.
fn print_rows(arr: &[Value]) {
    if arr.is_empty() {
        println!("(empty)");
        return;
    }
    let Some(Value::Object(first)) = arr.first() else {
        // Plain numbers: cap the dump, these can be 100k terminal values
        let shown: Vec<String> = arr.iter().take(20).map(format_value).collect();
        let suffix = if arr.len() > 20 {
            format!(" … ({} total)", arr.len())
        } else {
            String::new()
        };
        println!("{}{}", shown.join(", "), suffix);
        return;
    };

    let headers: Vec<String> = flatten_keys(first);
    let mut builder = Builder::default();
    builder.push_record(&headers);
    for item in arr {
        if let Value::Object(_) = item {
            let row: Vec<String> = headers
                .iter()
                .map(|h| {
                    lookup_path(item, h)
                        .map(|v| format_value(&v))
                        .unwrap_or_default()
                })
                .collect();
            builder.push_record(row);
        }
    }
    println!("{}", Table::from(builder));
}

/// One level of nesting flattens to dotted columns, so a yearly percentile
/// row renders as `portfolio_value.p50` etc.
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

fn print_envelope_footer(envelope: &serde_json::Map<String, Value>) {
    if let Some(Value::Array(warnings)) = envelope.get("warnings") {
        if !warnings.is_empty() {
            println!("\nWarnings:");
            for w in warnings {
                if let Value::String(s) = w {
                    println!("  - {}", s);
                }
            }
        }
    }
    if let Some(Value::String(meth)) = envelope.get("methodology") {
        println!("\nMethodology: {}", meth);
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n
            .as_f64()
            .map(|f| {
                if f.abs() >= 1000.0 {
                    format!("{f:.2}")
                } else {
                    format!("{f}")
                }
            })
            .unwrap_or_else(|| n.to_string()),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            items.join(", ")
        }
        Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}
