mod cli;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::sync::mpsc;

use perch_core::kernel::constants::{APP_NAME, APP_VERSION};
use perch_core::lifecycle::DeleteOutcome;
use perch_core::storage::{HostConfig, Placement};
use perch_core::telemetry::HardwareDomain;
use perch_core::{Host, KernelError};

use crate::cli::TerminalConfirmation;

/// Perch: desktop widgets backed by plugins
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Print "pong" and exit
    #[arg(long)]
    ping: bool,

    /// Configuration file (.json, .yaml, .yml or .toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overriding the configuration and PERCH_DATA_DIR
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Sample hardware at the low-power interval
    #[arg(long, global = true)]
    low_power: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect plugins
    Plugins {
        #[command(subcommand)]
        command: PluginCommand,
    },
    /// Manage widget instances
    Widgets {
        #[command(subcommand)]
        command: WidgetCommand,
    },
    /// Print telemetry samples of one hardware domain as JSON lines
    Monitor {
        /// cpu, gpu, memory, disk or network
        domain: HardwareDomain,
        #[arg(long, default_value_t = 3)]
        samples: usize,
        /// Sampling interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Show every enabled widget until interrupted
    Run,
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// List discovered plugins and load failures
    List,
    /// List the widget types loaded plugins offer
    Types,
}

#[derive(Subcommand, Debug)]
enum WidgetCommand {
    /// List widget instances
    List,
    /// Add a widget of a type offered by a loaded plugin
    Add {
        plugin_id: String,
        type_tag: String,
        #[arg(long, requires = "y")]
        x: Option<i32>,
        #[arg(long, requires = "x")]
        y: Option<i32>,
    },
    Enable {
        id: String,
    },
    Disable {
        id: String,
    },
    Delete {
        id: String,
        /// Do not ask for confirmation
        #[arg(long, short)]
        yes: bool,
    },
    /// Replace a widget's settings with a JSON object
    Settings {
        id: String,
        json: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.ping {
        println!("pong");
        return ExitCode::SUCCESS;
    }

    logging::init();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &CliArgs) -> Result<HostConfig, KernelError> {
    let mut config = match &args.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if args.low_power {
        config.low_power = true;
    }
    if let Some(Commands::Monitor {
        interval_ms: Some(interval_ms),
        ..
    }) = &args.command
    {
        config.telemetry.interval_ms = *interval_ms;
    }
    Ok(config)
}

fn build_host(config: HostConfig, assume_yes: bool) -> Result<Host, KernelError> {
    let clock = clock_widgets::manifest().map_err(|e| KernelError::Other(e.to_string()))?;
    let monitor = system_monitor::manifest().map_err(|e| KernelError::Other(e.to_string()))?;
    Host::builder(config)
        .builtin_plugin(clock, clock_widgets::register)
        .builtin_plugin(monitor, system_monitor::register)
        .confirmation(Arc::new(TerminalConfirmation { assume_yes }))
        .build()
}

async fn run(args: CliArgs) -> Result<(), KernelError> {
    let config = load_config(&args)?;
    let assume_yes = matches!(
        &args.command,
        Some(Commands::Widgets {
            command: WidgetCommand::Delete { yes: true, .. }
        })
    );

    let mut host = build_host(config, assume_yes)?;
    host.start().await?;

    let outcome = match args.command {
        Some(Commands::Plugins { command }) => plugins_command(&host, command),
        Some(Commands::Widgets { command }) => widgets_command(&host, command).await,
        Some(Commands::Monitor { domain, samples, .. }) => monitor(&host, domain, samples).await,
        Some(Commands::Run) => run_widgets(&host).await,
        None => {
            status(&host);
            Ok(())
        }
    };

    let shutdown = host.shutdown().await;
    outcome.and(shutdown)
}

fn status(host: &Host) {
    println!("{} v{}", APP_NAME, APP_VERSION);
    println!("Data directory: {}", host.config().data_dir.display());
    println!("Plugins loaded: {}", host.plugins().loaded_plugins().len());
    println!("Widgets: {}", host.store().instances().len());
}

fn plugins_command(host: &Host, command: PluginCommand) -> Result<(), KernelError> {
    match command {
        PluginCommand::List => {
            let manifests = host.plugins().manifests();
            if manifests.is_empty() {
                println!("No plugins found.");
            }
            for manifest in manifests {
                let status = if host.plugins().is_loaded(&manifest.id) {
                    "loaded"
                } else if manifest.disabled {
                    "disabled"
                } else {
                    "not loaded"
                };
                println!("{} {} ({}) [{}]", manifest.id, manifest.version, manifest.name, status);
            }
            for failure in host.plugins().last_report().failures {
                println!("{} [failed] {}", failure.plugin_id, failure.reason);
            }
        }
        PluginCommand::Types => {
            for (plugin_id, descriptor) in host.lifecycle().available_widget_types() {
                println!(
                    "{} {} \"{}\" {}x{}",
                    plugin_id,
                    descriptor.type_tag,
                    descriptor.display_name(),
                    descriptor.default_size.width,
                    descriptor.default_size.height
                );
            }
        }
    }
    Ok(())
}

async fn widgets_command(host: &Host, command: WidgetCommand) -> Result<(), KernelError> {
    let lifecycle = host.lifecycle();
    match command {
        WidgetCommand::List => {
            let mut instances = lifecycle.instances();
            if instances.is_empty() {
                println!("No widgets.");
            }
            instances.sort_by(|(a, _), (b, _)| a.id.cmp(&b.id));
            for (instance, state) in instances {
                println!(
                    "{} {}/{} [{}]",
                    instance.id, instance.plugin_id, instance.type_tag, state
                );
            }
        }
        WidgetCommand::Add {
            plugin_id,
            type_tag,
            x,
            y,
        } => {
            let placement = match (x, y) {
                (Some(x), Some(y)) => {
                    let descriptor = host.plugins().widget_type(&plugin_id, &type_tag)?;
                    Some(Placement {
                        x,
                        y,
                        width: descriptor.default_size.width,
                        height: descriptor.default_size.height,
                    })
                }
                _ => None,
            };
            let instance = lifecycle.add_widget(&plugin_id, &type_tag, placement).await?;
            println!("Added widget {}", instance.id);
        }
        WidgetCommand::Enable { id } => {
            lifecycle.enable(&id).await?;
            println!("Enabled widget {}", id);
        }
        WidgetCommand::Disable { id } => {
            lifecycle.disable(&id).await?;
            println!("Disabled widget {}", id);
        }
        WidgetCommand::Delete { id, .. } => match lifecycle.delete(&id).await? {
            DeleteOutcome::Deleted => println!("Deleted widget {}", id),
            DeleteOutcome::Cancelled => println!("Kept widget {}", id),
        },
        WidgetCommand::Settings { id, json } => {
            lifecycle.update_settings_json(&id, &json).await?;
            println!("Updated settings of widget {}", id);
        }
    }
    Ok(())
}

async fn monitor(host: &Host, domain: HardwareDomain, samples: usize) -> Result<(), KernelError> {
    let (sender, mut receiver) = mpsc::unbounded_channel();
    let subscription = host.telemetry().subscribe(domain, move |sample| {
        let _ = sender.send(sample.clone());
    });

    for _ in 0..samples {
        let Some(sample) = receiver.recv().await else {
            break;
        };
        let line = serde_json::to_string(&sample).map_err(|e| KernelError::Other(e.to_string()))?;
        println!("{}", line);
    }
    host.telemetry().unsubscribe(subscription);
    Ok(())
}

async fn run_widgets(host: &Host) -> Result<(), KernelError> {
    let lifecycle = host.lifecycle();
    for (instance, state) in lifecycle.instances() {
        if !state.is_enabled() {
            continue;
        }
        match lifecycle.window_shown(&instance.id).await? {
            Some(_) => println!("Showing {} ({}/{})", instance.id, instance.plugin_id, instance.type_tag),
            None => println!("Showing {} without content", instance.id),
        }
    }
    info!("{} running, press Ctrl-C to exit", APP_NAME);
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| KernelError::Other(format!("waiting for Ctrl-C failed: {}", e)))?;
    println!("Shutting down...");
    Ok(())
}
