//! # shunt CLI
//!
//! Runs the proxy's resolution path outside a host process, and shows the
//! configuration the proxy would pick up.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shunt_config::Config;
use shunt_core::{Resolution, ResolutionCache, SymbolAddress, SystemLoader};

/// Inspect and exercise the shunt library proxy
#[derive(Parser)]
#[command(name = "shunt")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the genuine libraries (overrides config)
    #[arg(long, global = true, env = "SHUNT_SYSTEM_DIR")]
    system_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve exports of a genuine library the way the proxy does
    Resolve {
        /// Library name without extension, e.g. `version`
        library: String,

        /// Export names
        #[arg(required = true)]
        symbols: Vec<String>,

        /// Print a JSON report
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show where the proxy looks for libraries and configuration
    Doctor,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Effective configuration after all layers
    Show,
    /// Built-in defaults as TOML
    Default,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SHUNT_LOG")
                .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Resolve {
            library,
            symbols,
            json,
        } => cmd_resolve(cli.system_dir, &library, &symbols, json),
        Commands::Config { command } => {
            match command {
                ConfigCommands::Show => {
                    let config = Config::load().context("failed to load configuration")?;
                    print!("{}", config.to_toml());
                }
                ConfigCommands::Default => print!("{}", Config::default_toml()),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor => cmd_doctor(cli.system_dir),
    }
}

/// Stand-in for the proxy's unresolved-call stub. Never called by the CLI; its
/// address only marks stubbed results.
extern "C" fn cli_stub() -> ! {
    eprintln!("NO FPTR RESOLVED!");
    std::process::exit(3)
}

fn loader(system_dir: Option<PathBuf>) -> Result<SystemLoader> {
    Ok(match system_dir {
        Some(dir) => SystemLoader::with_system_dir(dir),
        None => {
            let config = Config::load().context("failed to load configuration")?;
            SystemLoader::from_config(&config.loader)
        }
    })
}

fn cmd_resolve(
    system_dir: Option<PathBuf>,
    library: &str,
    symbols: &[String],
    json: bool,
) -> Result<ExitCode> {
    let cache = ResolutionCache::new(
        Box::new(loader(system_dir)?),
        SymbolAddress::of_stub(cli_stub),
    );

    let results: Vec<(&str, Resolution)> = symbols
        .iter()
        .map(|symbol| (symbol.as_str(), cache.resolve(library, symbol)))
        .collect();
    let module_path = cache
        .loaded_modules()
        .into_iter()
        .find(|(name, _)| name == library)
        .map(|(_, path)| path);
    let stats = cache.stats();
    let all_resolved = results.iter().all(|(_, r)| r.is_resolved());

    if json {
        let report = serde_json::json!({
            "library": library,
            "module": module_path.as_ref().map(|p| p.display().to_string()),
            "symbols": results
                .iter()
                .map(|(symbol, resolution)| serde_json::json!({
                    "symbol": symbol,
                    "status": status(*resolution),
                    "address": resolution.address().map(|a| a.to_string()),
                }))
                .collect::<Vec<_>>(),
            "stats": {
                "module_loads": stats.module_loads,
                "load_failures": stats.load_failures,
                "symbol_queries": stats.symbol_queries,
                "cache_hits": stats.cache_hits,
                "unresolved": stats.unresolved,
            },
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &module_path {
            Some(path) => println!("{library}: {}", path.display()),
            None => println!("{library}: no module"),
        }
        for (symbol, resolution) in &results {
            match resolution.address() {
                Some(addr) => println!("  {symbol:<32} {:<9} {addr}", status(*resolution)),
                None => println!("  {symbol:<32} {}", status(*resolution)),
            }
        }
        println!(
            "loads={} failures={} queries={} hits={} unresolved={}",
            stats.module_loads,
            stats.load_failures,
            stats.symbol_queries,
            stats.cache_hits,
            stats.unresolved,
        );
    }

    Ok(if all_resolved {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn status(resolution: Resolution) -> &'static str {
    match resolution {
        Resolution::Resolved(_) => "resolved",
        Resolution::Stubbed(_) => "stub",
        Resolution::NoModule => "no module",
    }
}

fn cmd_doctor(system_dir: Option<PathBuf>) -> Result<ExitCode> {
    let config = Config::load();

    println!("Configuration:");
    for (label, path) in [
        ("Global", Config::global_config_path()),
        ("Local", Config::local_config_path()),
    ] {
        match path {
            Some(p) if p.exists() => println!("  {label}: {}", p.display()),
            Some(p) => println!("  {label}: {} (not present)", p.display()),
            None => println!("  {label}: unavailable"),
        }
    }

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            println!("  error: {err}");
            println!("  (the proxy would fall back to defaults)");
            Config::default()
        }
    };

    let loader = match system_dir {
        Some(dir) => SystemLoader::with_system_dir(dir),
        None => SystemLoader::from_config(&config.loader),
    };
    println!();
    let healthy = match loader.system_dir() {
        Ok(dir) => {
            let present = dir.is_dir();
            println!(
                "System directory: {}{}",
                dir.display(),
                if present { "" } else { " (missing)" }
            );
            present
        }
        Err(err) => {
            println!("System directory: {err}");
            false
        }
    };

    println!("Stub policy: {:?}", config.stub.policy);
    println!("Log level: {}", config.log.level.as_str());
    match &config.companion.library {
        Some(lib) => println!(
            "Companion: {} (entry `{}`)",
            lib.display(),
            config.companion.entry
        ),
        None => println!("Companion: none"),
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
