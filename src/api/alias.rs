//! Response alias law (§6.1, §8 P8): every snake_case key in a JSON response
//! additionally carries a camelCase alias and an underscore-less ("nocase")
//! alias, recursively through nested objects and arrays. Grounded on the
//! original dashboard's `add_camel_aliases` (and its test suite, which pins
//! down that only `snake_case`/`camelCase`/`nocase` forms are generated —
//! no intermediate variants).

use serde_json::Value;

/// Applies the alias law to a JSON value before it leaves the process.
/// Keys without an underscore are left untouched (snake_case already equals
/// both alias forms for those).
pub fn add_camel_aliases(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len() * 2);
            for (key, v) in map {
                let aliased = add_camel_aliases(v);
                if key.contains('_') {
                    let camel = to_camel_case(&key);
                    let nocase = key.replace('_', "").to_lowercase();
                    out.entry(camel).or_insert_with(|| aliased.clone());
                    out.entry(nocase).or_insert_with(|| aliased.clone());
                }
                out.insert(key, aliased);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(add_camel_aliases).collect()),
        other => other,
    }
}

fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliases_simple_key() {
        let out = add_camel_aliases(json!({"entry_price": 45000}));
        assert_eq!(out["entry_price"], 45000);
        assert_eq!(out["entryPrice"], 45000);
        assert_eq!(out["entryprice"], 45000);
    }

    #[test]
    fn leaves_non_underscored_keys_alone() {
        let out = add_camel_aliases(json!({"status": "ok"}));
        assert_eq!(out.as_object().unwrap().len(), 1);
    }

    #[test]
    fn digit_after_underscore_is_not_upper_cased() {
        let out = add_camel_aliases(json!({"change_24h": 1.5}));
        assert_eq!(out["change24h"], 1.5);
        assert_eq!(out["change24h"], out["change_24h"]);
    }

    #[test]
    fn recurses_into_nested_objects_and_arrays() {
        let out = add_camel_aliases(json!({
            "positions": [{"entry_price": 1.0}, {"entry_price": 2.0}],
        }));
        let positions = out["positions"].as_array().unwrap();
        assert_eq!(positions[0]["entryPrice"], 1.0);
        assert_eq!(positions[1]["entryprice"], 2.0);
    }
}
