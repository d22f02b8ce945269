//! Analytics Schema CLI
//!
//! Loads schema definitions, shows resolved field sets, and validates sample
//! records the same way the data layer does at push time.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use familiar_analytics::{telemetry, AnalyticsConfig, DependencyPolicy, Record, SchemaRegistry, Validator};

#[derive(Parser)]
#[command(name = "analytics-schema")]
#[command(about = "Inspect analytics schemas and validate records")]
struct Cli {
    /// Config file (defaults to analytics.toml and ANALYTICS__* variables)
    #[arg(short, long)]
    config: Option<String>,

    /// Schema definition files or directories (added to the configured paths)
    #[arg(short, long)]
    schemas: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered schemas with their parents
    List,

    /// Print the flattened field set of a schema
    Resolve {
        /// Schema name
        name: String,
    },

    /// Validate a JSON record against a schema
    Validate {
        /// Schema name
        name: String,
        /// Path to a JSON file holding one record
        record: PathBuf,
        /// Drop fields with unsatisfied dependencies instead of rejecting
        #[arg(long)]
        omit_unsatisfied: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match AnalyticsConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    telemetry::init_tracing(&config.logging.filter);

    if let Err(e) = run(cli, config) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli, mut config: AnalyticsConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.schemas.paths.extend(cli.schemas);
    let registry = config.build_registry()?;

    match cli.command {
        Commands::List => {
            if registry.is_empty() {
                println!("No schemas registered");
                return Ok(());
            }
            for name in registry.names() {
                match registry.get(name).and_then(|s| s.parent.as_deref()) {
                    Some(parent) => println!("  {} ← {}", name, parent),
                    None => println!("  {}", name),
                }
            }
            Ok(())
        }

        Commands::Resolve { name } => {
            let fields = registry.resolve(&name)?;
            let chain: Vec<&str> = registry
                .ancestry(&name)?
                .into_iter()
                .rev()
                .map(|s| s.name.as_str())
                .collect();

            println!("🔍 {} ({})", name, chain.join(" → "));
            println!("{}", serde_json::to_string_pretty(&*fields)?);
            Ok(())
        }

        Commands::Validate {
            name,
            record,
            omit_unsatisfied,
        } => {
            let content = std::fs::read_to_string(&record)?;
            let input: Record = serde_json::from_str(&content)?;

            let policy = if omit_unsatisfied {
                DependencyPolicy::Omit
            } else {
                config.validation.dependency_policy
            };

            match validate(&registry, &name, &input, policy) {
                Ok(resolved) => {
                    println!("✅ Record is valid for {}", name);
                    println!("{}", serde_json::to_string_pretty(&resolved)?);
                    Ok(())
                }
                Err(e) => {
                    println!("❌ {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn validate(
    registry: &SchemaRegistry,
    name: &str,
    input: &Record,
    policy: DependencyPolicy,
) -> familiar_analytics::Result<Record> {
    Validator::new(registry).with_policy(policy).validate(name, input)
}
