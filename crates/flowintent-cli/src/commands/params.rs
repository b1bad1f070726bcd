//! `flowintent params`: print the parameters of a deep link.

use flowintent_core::ParamSet;
use serde_json::Value;

use super::print_json;

/// Parse `uri` into its parameter map.
pub fn parse(uri: &str) -> Result<Value, String> {
    let params = ParamSet::from_uri(uri).map_err(|e| e.to_string())?;
    serde_json::to_value(&params).map_err(|e| format!("Failed to serialize params: {}", e))
}

pub fn run(uri: &str) -> Result<(), String> {
    let value = parse(uri)?;
    print_json(&value);
    Ok(())
}
