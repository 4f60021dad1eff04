use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use reqflow_benchmarks::{get_standard_scenarios, ScenarioRunner};
use reqflow_core::CoordinationConfig;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "reqflow")]
#[command(version)]
#[command(about = "Reqflow - request batching, deduplication and scheduling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Preset {
    /// Defaults overridden by REQFLOW_* environment variables
    Env,
    LowLatency,
    HighThroughput,
}

impl Preset {
    fn config(self) -> CoordinationConfig {
        match self {
            Preset::Env => CoordinationConfig::from_env(),
            Preset::LowLatency => CoordinationConfig::low_latency(),
            Preset::HighThroughput => CoordinationConfig::high_throughput(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective coordination configuration as JSON
    Config {
        #[arg(short, long, value_enum, default_value = "env")]
        preset: Preset,
    },

    /// Run the standard coordination scenarios against a simulated backend
    Bench {
        #[arg(short, long, value_enum, default_value = "env")]
        preset: Preset,

        /// Only run the scenario with this name
        #[arg(short, long)]
        scenario: Option<String>,

        /// Output file for results (JSON)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("reqflow=info,reqflow_core=info"));

    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { preset } => {
            println!("{}", serde_json::to_string_pretty(&preset.config())?);
        }

        Commands::Bench { preset, scenario, output } => {
            let config = preset.config();
            info!(
                batch_delay_ms = config.batch.batch_delay_ms,
                max_batch_size = config.batch.max_batch_size,
                max_concurrent = config.scheduler.max_concurrent,
                "Starting reqflow benchmark suite v{}",
                env!("CARGO_PKG_VERSION")
            );

            let mut scenarios = get_standard_scenarios();
            if let Some(name) = &scenario {
                scenarios.retain(|s| &s.name == name);
                if scenarios.is_empty() {
                    anyhow::bail!("Unknown scenario: {}", name);
                }
            }

            let runner = ScenarioRunner::new(config);

            println!("Running {} scenarios...\n", scenarios.len());

            let mut results = Vec::new();
            for scenario in &scenarios {
                match runner.run(scenario).await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        eprintln!("Scenario '{}' failed: {:#}", scenario.name, e);
                        continue;
                    }
                }
            }

            println!("Scenario Summary\n");
            for result in &results {
                println!("{}:", result.config.name);
                println!("  Requests: {}", result.metrics.total_requests);
                println!("  Downstream calls: {}", result.downstream_calls);
                println!("  Batching rate: {:.1}%", result.metrics.batching_rate * 100.0);
                println!(
                    "  Deduplication rate: {:.1}%",
                    result.metrics.deduplication_rate * 100.0
                );
                println!("  Total time: {:.1}ms", result.total_time_ms);
                println!();
            }

            if let Some(path) = output {
                let json = serde_json::to_string_pretty(&results)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("Failed to write results to {}", path))?;
                println!("Results saved to: {}", path);
            } else {
                println!("Tip: Use -o <file> to save results to JSON");
            }

            if results.len() != scenarios.len() {
                anyhow::bail!("{} of {} scenarios failed", scenarios.len() - results.len(), scenarios.len());
            }
        }
    }

    Ok(())
}
