//! Small line-based `KEY=VALUE` parser for LLM analyst/researcher replies,
//! generalized from the vault's decision-DSL parser: same style (uppercase
//! keys, reject anything not on the allow-list), different field set per
//! agent type.

use std::collections::HashMap;

use anyhow::{anyhow, Result};

pub fn parse_kv(raw: &str, allowed_keys: &[&str]) -> Result<HashMap<String, String>> {
    let mut out = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let key = k.trim().to_ascii_uppercase();
        if !allowed_keys.contains(&key.as_str()) {
            return Err(anyhow!("unknown key in agent reply dsl: {key}"));
        }
        out.insert(key, v.trim().to_string());
    }
    Ok(out)
}

pub fn get_f64(fields: &HashMap<String, String>, key: &str, default: f64) -> f64 {
    fields.get(key).and_then(|v| v.parse::<f64>().ok()).unwrap_or(default)
}

pub fn get_string(fields: &HashMap<String, String>, key: &str, default: &str) -> String {
    fields.get(key).cloned().unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_keys() {
        let fields = parse_kv("BIAS=0.4\nCONFIDENCE=0.7\nRATIONALE=trend up", &["BIAS", "CONFIDENCE", "RATIONALE"]).unwrap();
        assert_eq!(get_f64(&fields, "BIAS", 0.0), 0.4);
        assert_eq!(get_string(&fields, "RATIONALE", ""), "trend up");
    }

    #[test]
    fn rejects_unknown_key() {
        let result = parse_kv("BIAS=0.4\nWAT=1", &["BIAS"]);
        assert!(result.is_err());
    }
}
