//! `flowintent validate`: check a chain definition and, optionally, a deep link against it.

use flowintent_core::deeplink::RuleFailure;
use flowintent_core::{ChainDefinition, ParamSet};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub name: String,
    pub action: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub chain: String,
    pub initial: String,
    pub steps: Vec<StepSummary>,
    pub rules: usize,
    /// Failures of the deep link, when one was given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failures: Option<Vec<RuleFailure>>,
}

impl ValidationReport {
    pub fn deep_link_ok(&self) -> bool {
        self.failures.as_ref().map_or(true, |f| f.is_empty())
    }
}

/// Load `chain_file`, check its links and rules, and validate `uri` if given.
pub fn check(chain_file: &str, uri: Option<&str>) -> Result<ValidationReport, String> {
    let definition = ChainDefinition::from_file(chain_file).map_err(|e| e.to_string())?;
    definition.check_links().map_err(|e| e.to_string())?;
    let validator = definition.validator().map_err(|e| e.to_string())?;

    let failures = match uri {
        Some(uri) => {
            let params = ParamSet::from_uri(uri).map_err(|e| e.to_string())?;
            Some(match validator.validate(&params) {
                Ok(_) => Vec::new(),
                Err(err) => err.failures().to_vec(),
            })
        }
        None => None,
    };

    let initial = definition
        .initial
        .clone()
        .or_else(|| definition.steps.first().map(|s| s.name.clone()))
        .unwrap_or_default();

    Ok(ValidationReport {
        chain: definition.name,
        initial,
        steps: definition
            .steps
            .into_iter()
            .map(|s| StepSummary {
                name: s.name,
                action: s.action,
                target: s.target,
                parent: s.parent,
                next: s.next,
            })
            .collect(),
        rules: validator.len(),
        failures,
    })
}

pub fn run(chain_file: &str, uri: Option<&str>) -> Result<(), String> {
    let report = check(chain_file, uri)?;

    println!("📄 Chain: {} ({})", report.chain, chain_file);
    println!("   {} step(s), {} rule(s), initial: {}", report.steps.len(), report.rules, report.initial);
    println!();
    for step in &report.steps {
        let marker = if step.name == report.initial { "▶" } else { " " };
        let next = step.next.as_deref().unwrap_or("(end)");
        println!("  {} {:<20} {:<40} → {}", marker, step.name, step.target, next);
    }

    match &report.failures {
        None => Ok(()),
        Some(failures) if failures.is_empty() => {
            println!();
            println!("✅ Deep link is valid");
            Ok(())
        }
        Some(failures) => {
            println!();
            for failure in failures {
                println!("   ❌ {}", failure.message);
            }
            Err(format!("Deep link failed {} rule(s)", failures.len()))
        }
    }
}
