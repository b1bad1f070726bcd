//! `flowintent run`: dry-run a chain definition against the scripted platform.

use std::sync::{Arc, Mutex};

use flowintent_core::chain::RunSummary;
use flowintent_core::config::ValidationPolicy;
use flowintent_core::{ChainDefinition, ChainEvent, ParamSet};
use serde::Serialize;
use tokio_stream::StreamExt;

use super::print_json;
use crate::platform::{LaunchRecord, ScriptedLauncher};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub uri: Option<String>,
    /// YAML list of results; without it every step is answered with an empty OK result.
    pub results_file: Option<String>,
    pub policy: Option<ValidationPolicy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub chain: String,
    pub policy: ValidationPolicy,
    pub validation_errors: Vec<String>,
    pub dispatches: Vec<LaunchRecord>,
    pub events: Vec<ChainEvent>,
    pub summary: RunSummary,
    /// True when a dispatch arrived after the scripted results ran out.
    pub exhausted: bool,
}

pub async fn execute(chain_file: &str, options: &RunOptions) -> Result<RunReport, String> {
    let definition = ChainDefinition::from_file(chain_file).map_err(|e| e.to_string())?;
    let chain = definition.name.clone();
    let mut config = definition.config.clone();
    if let Some(policy) = options.policy {
        config.validation_policy = policy;
    }

    let launcher = Arc::new(match &options.results_file {
        Some(path) => ScriptedLauncher::from_file(path)?,
        None => ScriptedLauncher::all_ok(definition.steps.len()),
    });

    let validation_errors = Arc::new(Mutex::new(Vec::new()));
    let sink = validation_errors.clone();

    let mut registry = definition.into_registry().map_err(|e| e.to_string())?;
    if let Some(uri) = &options.uri {
        registry.with_params(ParamSet::from_uri(uri).map_err(|e| e.to_string())?);
    }
    registry.on_deep_link_error(move |err| {
        if let Ok(mut errors) = sink.lock() {
            errors.extend(err.failures().iter().map(|f| f.message.clone()));
        }
    });

    let engine = registry.into_engine(launcher.clone(), config.clone());
    let mut stream = engine.subscribe();
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            tracing::debug!("[run] Event {} from step '{}'", event.sequence, event.step);
            events.push(event);
        }
        events
    });

    let run = engine.start().map_err(|e| e.to_string())?;
    let (summary, exhausted) = tokio::select! {
        summary = run.join() => (summary.map_err(|e| e.to_string())?, false),
        _ = launcher.exhausted() => (
            RunSummary {
                dispatched: launcher.records().len(),
                results: 0,
                completed: false,
            },
            true,
        ),
    };

    let events = collector
        .await
        .map_err(|e| format!("Event collector failed: {}", e))?;
    let summary = if exhausted {
        RunSummary {
            results: events.len(),
            ..summary
        }
    } else {
        summary
    };

    let validation_errors = validation_errors
        .lock()
        .map(|errors| errors.clone())
        .unwrap_or_default();

    Ok(RunReport {
        chain,
        policy: config.validation_policy,
        validation_errors,
        dispatches: launcher.records(),
        events,
        summary,
        exhausted,
    })
}

pub async fn run(chain_file: &str, options: RunOptions, json: bool) -> Result<(), String> {
    let report = execute(chain_file, &options).await?;

    if json {
        let value = serde_json::to_value(&report)
            .map_err(|e| format!("Failed to serialize report: {}", e))?;
        print_json(&value);
        return Ok(());
    }

    println!("📄 Running chain: {} ({})", report.chain, chain_file);
    println!("   policy: {}", report.policy.as_str());
    for error in &report.validation_errors {
        println!("   ⚠️  {}", error);
    }
    println!();

    for (i, dispatch) in report.dispatches.iter().enumerate() {
        let step = dispatch.step.as_deref().unwrap_or("-");
        println!("  → [{}] {} → {}", i, step, dispatch.request.target);
        if let Some(event) = report.events.get(i) {
            println!("    ← status {} at {}", event.result.status, event.received_at.to_rfc3339());
        }
    }
    println!();

    if report.exhausted {
        return Err(format!(
            "Scripted results ran out after {} dispatch(es)",
            report.summary.dispatched
        ));
    }
    if report.summary.dispatched == 0 {
        println!("⛔ First launch blocked by validation policy");
    } else {
        println!(
            "🎉 Chain completed: {} dispatch(es), {} result(s)",
            report.summary.dispatched, report.summary.results
        );
    }
    Ok(())
}
