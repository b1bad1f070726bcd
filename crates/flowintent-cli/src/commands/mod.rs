//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command. Commands build a
//! serializable report first and print it second, so the integration tests
//! exercise the same code paths as the binary.

pub mod params;
pub mod run;
pub mod validate;

use flowintent_core::config::ValidationPolicy;

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

/// Parse a `--policy` value.
pub fn parse_policy(value: &str) -> Result<ValidationPolicy, String> {
    ValidationPolicy::from_str(value).ok_or_else(|| {
        format!(
            "Unknown validation policy '{}' (expected launch_anyway or block_first_launch)",
            value
        )
    })
}
