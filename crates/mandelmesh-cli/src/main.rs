//! Mandelmesh command-line interface.
//!
//! Run row-partitioned escape-time jobs from TOML configuration files:
//! ```sh
//! mandelmesh run job.toml --workers 8
//! mandelmesh validate job.toml
//! mandelmesh partition --height 3000 --workers 7
//! mandelmesh presets
//! ```

mod config;
mod runner;

use clap::{Parser, Subcommand};
use mandelmesh_core::types::PRESETS;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mandelmesh")]
#[command(about = "Mandelmesh: row-partitioned distributed escape-time grids")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job from a TOML configuration file.
    Run {
        /// Path to the job configuration file.
        config: PathBuf,
        /// Output directory (overrides config file setting).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Number of workers (overrides config file setting).
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Validate a configuration file without running the job.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// Print how rows are split between workers.
    Partition {
        #[arg(long)]
        height: usize,
        #[arg(short, long)]
        workers: usize,
    },
    /// List the named viewports.
    Presets,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output,
            workers,
        } => {
            println!("Mandelmesh");
            println!("==========");
            let job = config::load_config(&config)?;
            println!("Configuration: {}", config.display());

            let result = runner::run_job(&job, workers)?;
            runner::print_timings(&result.run.timings);
            println!(
                "Array size: {} x {}",
                result.run.global.height(),
                result.run.global.width()
            );

            let out_dir = output.unwrap_or_else(|| PathBuf::from(&job.output.directory));

            if job.output.save_matrix {
                runner::write_matrix_csv(&result.run.global, &out_dir.join("matrix.csv"))?;
            }

            if job.output.save_summary {
                let summary = runner::RunSummary::new(&result, &job);
                runner::write_summary_json(&summary, &out_dir.join("summary.json"))?;
            }

            println!("Run complete.");
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            let vp = job.validate()?;
            println!("Configuration is valid: {}", config.display());
            println!(
                "  {} x {} grid, maxiter {}, {} workers",
                vp.width, vp.height, vp.maxiter, job.run.workers
            );
            Ok(())
        }
        Commands::Partition { height, workers } => runner::print_partition(height, workers),
        Commands::Presets => {
            println!("Available presets:");
            println!();
            for (name, description) in PRESETS {
                println!("  {:<10} {}", name, description);
            }
            Ok(())
        }
    }
}
