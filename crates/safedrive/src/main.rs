//! `safedrive` - CLI for the SafeDrive telemetry subsystem
//!
//! This binary runs the live pipeline and queries the backend and the local
//! evidence log.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use safedrive::cli::{
    AccidentsCommand, Cli, Command, ConfigCommand, EvidenceCommand, HistoryCommand, RiskCommand,
    WatchCommand,
};
use safedrive::severity::{accident_annotations, classify_accident_severity};
use safedrive::{
    init_logging, Config, EvidenceStore, HttpApi, KvStore, Pipeline, PipelineEvent,
    PipelineOptions, RiskKey, RiskQueryCache, SampleAssessment, SeverityLevel, TelemetryApi,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // `config validate` reports load errors itself
    if let Command::Config(ConfigCommand::Validate { file }) = &cli.command {
        return handle_validate(file.clone().or_else(|| cli.config.clone()));
    }

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Watch(cmd) => handle_watch(&config, &cmd, cli.quiet).await,
        Command::Evidence(cmd) => handle_evidence(&config, &cmd),
        Command::History(cmd) => handle_history(&config, &cmd).await,
        Command::Accidents(cmd) => handle_accidents(&config, &cmd).await,
        Command::Risk(cmd) => handle_risk(&config, cmd).await,
        Command::Stats(cmd) => handle_stats(&config, cmd.json).await,
        Command::Status(cmd) => handle_status(&config, cmd.json).await,
        Command::Config(cmd) => handle_config(&config, &cmd),
    }
}

fn open_evidence(config: &Config) -> anyhow::Result<EvidenceStore<KvStore>> {
    let path = config.database_path();
    let store = KvStore::open(&path)
        .with_context(|| format!("opening local store at {}", path.display()))?;

    let mut evidence = EvidenceStore::new(store, config.storage.evidence_key.clone());
    let outcome = evidence.load();
    if let Some(err) = outcome.error {
        warn!(error = %err, "Starting with an empty evidence log");
    }
    Ok(evidence)
}

async fn handle_watch(config: &Config, cmd: &WatchCommand, quiet: bool) -> anyhow::Result<()> {
    let mut options = PipelineOptions::from(config);
    if let Some(ms) = cmd.sample_interval_ms {
        anyhow::ensure!(ms > 0, "--sample-interval-ms must be greater than 0");
        options.sample_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = cmd.position_interval_ms {
        anyhow::ensure!(ms > 0, "--position-interval-ms must be greater than 0");
        options.position_interval = Duration::from_millis(ms);
    }
    options.track_path = !cmd.no_path;
    options.probe_health = !cmd.no_health;

    let evidence = open_evidence(config)?;
    let api = Arc::new(HttpApi::from_config(config)?);
    if !quiet {
        println!(
            "Watching {} every {} ms ({} evidence entries on record). Press Ctrl-C to stop.",
            api.base_url(),
            options.sample_interval.as_millis(),
            evidence.len()
        );
    }

    let pipeline = Pipeline::start(api, evidence, &options)?;
    let mut events = pipeline.subscribe();

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if !quiet {
                        print_event(&event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Display fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    let path = pipeline.path();
    let evidence = pipeline.shutdown().await?;
    if !quiet {
        println!();
        println!("Stopped.");
        println!("Evidence entries: {}", evidence.len());
        println!("Path points:      {}", path.len());
    }
    Ok(())
}

fn print_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Sample {
            sample,
            assessment,
            engine,
        } => {
            let id = sample
                .id
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string);
            let r = &sample.readings;
            println!(
                "sample {id:<8} engine={engine:<8} alcohol={} impact={}g distance={}m vibration={}{}",
                reading(r.alcohol, 3),
                reading(r.impact, 2),
                reading(r.distance, 1),
                reading(r.vibration, 0),
                if assessment.dangerous { "  DANGER" } else { "" }
            );
        }
        PipelineEvent::EvidenceCaptured(entry) => {
            println!(
                "evidence captured: {} at {}",
                entry.capture_id,
                entry.saved_at.to_rfc3339()
            );
        }
        PipelineEvent::PersistenceFailed {
            capture_id,
            message,
        } => {
            println!("evidence {capture_id} kept in memory only: {message}");
        }
        PipelineEvent::FetchFailed { source, message } => {
            println!("{source} fetch failed: {message}");
        }
        PipelineEvent::PathExtended(point) => {
            println!("position {:.6}, {:.6}", point.lat, point.lng);
        }
        PipelineEvent::Connectivity(connected) => {
            println!(
                "backend {}",
                if *connected { "connected" } else { "unreachable" }
            );
        }
    }
}

fn reading(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

fn level(value: Option<SeverityLevel>) -> String {
    value.map_or_else(|| "-".to_string(), |l| l.to_string())
}

fn handle_evidence(config: &Config, cmd: &EvidenceCommand) -> anyhow::Result<()> {
    let evidence = open_evidence(config)?;

    match cmd {
        EvidenceCommand::Count => println!("{}", evidence.len()),
        EvidenceCommand::List { limit, json } => {
            let entries = evidence.entries();
            let skip = limit.map_or(0, |n| entries.len().saturating_sub(n));
            let shown = &entries[skip..];

            if *json {
                println!("{}", serde_json::to_string_pretty(shown)?);
            } else if shown.is_empty() {
                println!("No evidence captured.");
            } else {
                println!(
                    "{:<16} {:<26} {:>8} {:>8} {:>9} {:>8}",
                    "CAPTURE", "SAVED AT", "ALCOHOL", "IMPACT", "DISTANCE", "BELT"
                );
                for entry in shown {
                    let r = &entry.sample.readings;
                    println!(
                        "{:<16} {:<26} {:>8} {:>8} {:>9} {:>8}",
                        entry.capture_id.to_string(),
                        entry.saved_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                        reading(r.alcohol, 3),
                        reading(r.impact, 2),
                        reading(r.distance, 1),
                        match r.seatbelt {
                            Some(true) => "on",
                            Some(false) => "off",
                            None => "-",
                        }
                    );
                }
            }
        }
    }
    Ok(())
}

async fn handle_history(config: &Config, cmd: &HistoryCommand) -> anyhow::Result<()> {
    let api = HttpApi::from_config(config)?;
    let history = api.sensor_history(&CancellationToken::new()).await?;
    let skip = history.len().saturating_sub(cmd.limit);
    let shown = &history[skip..];

    if cmd.json {
        let rows: Vec<_> = shown
            .iter()
            .map(|sample| {
                serde_json::json!({
                    "sample": sample,
                    "assessment": SampleAssessment::of(sample),
                    "engine": sample.engine_state(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for sample in shown {
        let a = SampleAssessment::of(sample);
        let when = sample
            .timestamp
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let heart = match (sample.heart_rate, a.heart_rate) {
            (Some(bpm), Some(band)) => format!("{bpm} bpm ({band})"),
            _ => "-".to_string(),
        };
        println!(
            "{when:<20} engine={:<8} alcohol={} impact={} distance={} vibration={} heart={heart}{}",
            sample.engine_state(),
            level(a.alcohol),
            level(a.impact),
            level(a.distance),
            level(a.vibration),
            if a.dangerous { "  DANGER" } else { "" }
        );
    }
    Ok(())
}

async fn handle_accidents(config: &Config, cmd: &AccidentsCommand) -> anyhow::Result<()> {
    let api = HttpApi::from_config(config)?;
    let cancel = CancellationToken::new();
    let events = if cmd.map {
        api.accident_map(&cancel).await?
    } else {
        api.accidents(&cancel).await?
    };

    if cmd.json {
        let rows: Vec<_> = events
            .iter()
            .map(|event| {
                serde_json::json!({
                    "event": event,
                    "severity": event.readings.impact.map(classify_accident_severity),
                    "notes": accident_annotations(event),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if events.is_empty() {
        println!("No accidents recorded.");
        return Ok(());
    }

    for event in &events {
        let when = event
            .timestamp
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let location = event
            .location()
            .map_or_else(|| "unknown".to_string(), |p| format!("{:.5}, {:.5}", p.lat, p.lng));
        println!(
            "{when:<20} {:<6} impact={}g at {location}{}",
            level(event.readings.impact.map(classify_accident_severity)),
            reading(event.readings.impact, 1),
            if event.emergency_call { " [emergency call]" } else { "" }
        );
        let notes = accident_annotations(event);
        if !notes.is_empty() {
            println!("    {}", notes.join(". "));
        }
    }
    Ok(())
}

async fn handle_risk(config: &Config, cmd: RiskCommand) -> anyhow::Result<()> {
    let api = Arc::new(HttpApi::from_config(config)?);
    let cache = RiskQueryCache::new(api);
    let timestamp = cmd
        .timestamp
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let result = cache.get(RiskKey::new(cmd.lat, cmd.lng, timestamp)).await?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Risk score:     {}% ({})", result.risk_score, result.level());
        println!("Accidents (7d): {}", result.accidents_count);
        println!("Sensor events:  {}", result.sensor_events_count);
        println!(
            "Weather:        {}",
            result.weather_condition.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

async fn handle_stats(config: &Config, json: bool) -> anyhow::Result<()> {
    let api = HttpApi::from_config(config)?;
    let stats = api.stats(&CancellationToken::new()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Total accidents:      {}", stats.total_accidents);
        println!("Max impact:           {:.2} g", stats.max_impact);
        println!("Max alcohol:          {:.3}", stats.max_alcohol);
        println!("Seatbelt violations:  {}", stats.seatbelt_violations);
        println!("Sensor points:        {}", stats.total_sensor_points);
    }
    Ok(())
}

async fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let api = HttpApi::from_config(config)?;
    let health = api.health(&CancellationToken::new()).await;
    let evidence = open_evidence(config)?;
    let stats = evidence.store().stats()?;
    let last_saved = evidence.store().updated_at(evidence.key())?;

    if json {
        let status = serde_json::json!({
            "backend": api.base_url(),
            "connected": health.is_ok(),
            "error": health.as_ref().err().map(ToString::to_string),
            "database_path": config.database_path(),
            "database_bytes": stats.db_size_bytes,
            "evidence_count": evidence.len(),
            "evidence_saved_at": last_saved,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("safedrive status");
        println!("----------------");
        println!("Backend:   {}", api.base_url());
        match &health {
            Ok(()) => println!("Connected: yes"),
            Err(e) => println!("Connected: no ({e})"),
        }
        println!("Database:  {}", config.database_path().display());
        println!("Evidence:  {} entries", evidence.len());
        if let Some(at) = last_saved {
            println!("Saved at:  {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: &ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[API]");
                println!("  Base URL:           {}", config.api.base_url);
                println!("  Request timeout:    {} ms", config.api.request_timeout_ms);
                println!();
                println!("[Polling]");
                println!("  Sample interval:    {} ms", config.polling.sample_interval_ms);
                println!("  Position interval:  {} ms", config.polling.position_interval_ms);
                println!("  Health interval:    {} ms", config.polling.health_interval_ms);
                println!();
                println!("[Ingest]");
                println!("  Alcohol unit:       {}", config.ingest.alcohol_unit);
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Evidence key:       {}", config.storage.evidence_key);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => handle_validate(file.clone())?,
    }
    Ok(())
}

fn handle_validate(file: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = file.unwrap_or_else(Config::default_config_path);
    println!("Validating configuration: {}", path.display());
    Config::load_file(&path)
        .with_context(|| format!("configuration {} is invalid", path.display()))?;
    println!("Configuration is valid.");
    Ok(())
}
