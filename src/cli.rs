//! CLI interface for phaseline

use crate::agent::HttpProbe;
use crate::config::{self, Config};
use crate::orchestrator::{MissionEvent, MissionOrchestrator, MissionParameters, MissionResult};
use crate::types::{Intensity, MissionType, ThreatLevel};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "phaseline")]
#[command(about = "Phased multi-agent mission orchestrator", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "PHASELINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a mission against one or more targets
    Run {
        /// Target URL (repeatable)
        #[arg(short, long = "target")]
        targets: Vec<String>,
        /// Load mission parameters from a TOML or YAML file
        #[arg(short, long)]
        params: Option<PathBuf>,
        /// Mission type
        #[arg(short, long, value_enum)]
        mission_type: Option<MissionType>,
        /// Probe intensity
        #[arg(short, long, value_enum)]
        intensity: Option<Intensity>,
        /// Initial threat level
        #[arg(long, value_enum)]
        threat_level: Option<ThreatLevel>,
        /// Apply a named scenario preset
        #[arg(short, long)]
        scenario: Option<String>,
        /// Mission time limit in seconds
        #[arg(long)]
        time_limit: Option<u64>,
        /// Print the mission result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// List scenario presets
    Scenarios,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Display the effective configuration
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the config file location
    Path,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            targets,
            params,
            mission_type,
            intensity,
            threat_level,
            scenario,
            time_limit,
            json,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            let mut mission = match params {
                Some(path) => load_params(&path)?,
                None => MissionParameters::new(crate::orchestrator::generate_mission_id(), Vec::new()),
            };
            if let Some(name) = scenario {
                let Some(preset) = config::scenario(&name) else {
                    bail!("Unknown scenario '{}'. Run `phaseline scenarios` to list presets.", name);
                };
                preset.apply(&mut config);
                mission.mission_type = preset.mission_type;
                mission.intensity = preset.intensity;
            }
            if !targets.is_empty() {
                mission.targets = targets;
            }
            if let Some(mission_type) = mission_type {
                mission.mission_type = mission_type;
            }
            if let Some(intensity) = intensity {
                mission.intensity = intensity;
            }
            if let Some(level) = threat_level {
                mission.threat_level = level;
            }
            if let Some(secs) = time_limit {
                mission = mission.with_time_limit(Duration::from_secs(secs));
            }
            run_mission(config, mission, json).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = load_config(cli.config.as_deref())?;
                print!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigCommands::Init { force } => {
                let path = match cli.config {
                    Some(path) => path,
                    None => config::config_path()?,
                };
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                Config::default().save_to(&path)?;
                println!("Wrote default configuration to {}", path.display());
            }
            ConfigCommands::Path => {
                let path = match cli.config {
                    Some(path) => path,
                    None => config::config_path()?,
                };
                println!("{}", path.display());
            }
        },
        Commands::Scenarios => {
            println!("{:<20} {:<26} {:<10} {}", "NAME", "TYPE", "INTENSITY", "DESCRIPTION");
            for preset in config::scenarios() {
                println!(
                    "{:<20} {:<26} {:<10} {}",
                    preset.name, preset.mission_type, preset.intensity, preset.description
                );
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn load_params(path: &Path) -> Result<MissionParameters> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read mission parameters from {}", path.display()))?;
    let params = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
        Some("json") => serde_json::from_str(&content)?,
        _ => toml::from_str(&content)?,
    };
    Ok(params)
}

async fn run_mission(config: Config, params: MissionParameters, json: bool) -> Result<()> {
    let probe = Arc::new(HttpProbe::new(&config.probe)?);
    let orchestrator = MissionOrchestrator::new(config, probe)?;

    let mut events = orchestrator.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if !json {
                print_event(&event);
            }
            if matches!(event, MissionEvent::MissionCompleted { .. }) {
                break;
            }
        }
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, aborting mission...");
            ctrl_c.cancel();
        }
    });

    let result = orchestrator.execute_mission_with_cancel(params, cancel).await?;
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }
    Ok(())
}

fn print_event(event: &MissionEvent) {
    match event {
        MissionEvent::MissionStarted { mission_id, agents, .. } => {
            println!("Mission {} started with {} agents", mission_id, agents.len());
        }
        MissionEvent::PhaseEntered { phase, attempt, agents, .. } => {
            if *attempt == 0 {
                println!("\n== {} ({} agents)", phase, agents.len());
            } else {
                println!("\n== {} retry {} ({} agents)", phase, attempt, agents.len());
            }
        }
        MissionEvent::PhaseCompleted {
            success_ratio,
            threat_level,
            reports,
            ..
        } => {
            for (agent_id, status) in reports {
                println!("   {:<28} {:?}", agent_id, status);
            }
            println!("   success {:.0}%  threat {}", success_ratio * 100.0, threat_level);
        }
        MissionEvent::PhaseRetried { reason, .. } => println!("   retrying: {}", reason),
        MissionEvent::AlertRaised { alert, .. } => {
            println!("   alert [{:?}] {}: {}", alert.kind, alert.source, alert.detail);
        }
        MissionEvent::SecurityEvent { event, .. } => {
            println!("   security: {} -> {} rejected ({})", event.sender, event.recipient, event.reason);
        }
        MissionEvent::MissionCompleted { .. } => {}
    }
}

fn print_result(result: &MissionResult) {
    println!("\nMission {}: {} at {}", result.mission_id, result.status, result.final_phase);
    if let Some(reason) = &result.abort_reason {
        println!("Abort reason: {}", reason);
    }
    println!(
        "Duration {:.1}s, {} retries, threat {} ({:.2})",
        result.duration().num_milliseconds() as f64 / 1000.0,
        result.total_retries,
        result.assessment.overall_level,
        result.assessment.overall_score
    );
    println!(
        "Probes {} (errors {}, blocked {}), avg latency {:.0}ms",
        result.summary.total_probes,
        result.summary.total_errors,
        result.summary.blocked_probes,
        result.summary.average_latency_ms
    );
    if !result.summary.top_risks.is_empty() {
        println!("Top risks:");
        for (target, score) in &result.summary.top_risks {
            println!("  {:.2}  {}", score, target);
        }
    }
    if !result.findings.is_empty() {
        println!("Findings:");
        for finding in &result.findings {
            println!("  [{} {}] {}", finding.phase, finding.agent_id, finding.detail);
        }
    }
}
