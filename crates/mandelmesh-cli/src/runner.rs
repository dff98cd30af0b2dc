//! Job runner: ties together configuration, the local world and output files.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use mandelmesh_compute::{ComputeBackend, CpuBackend, SerialBackend};
use mandelmesh_core::coordinator::{run_local, LocalRun, RunOptions, RunTimings};
use mandelmesh_core::partition::partition;
use mandelmesh_core::types::{GlobalMatrix, RowRange, Viewport};
use mandelmesh_core::PartitionStrategy;
use serde::Serialize;

use crate::config::{JobConfig, RunConfig};

/// Results from a job run.
#[derive(Debug)]
pub struct JobOutput {
    pub viewport: Viewport,
    pub workers: usize,
    pub run: LocalRun,
}

/// Run a job from a parsed configuration. `workers` overrides `run.workers`.
pub fn run_job(job: &JobConfig, workers: Option<usize>) -> Result<JobOutput> {
    let viewport = job.validate()?;
    let workers = workers.unwrap_or(job.run.workers);
    if workers == 0 {
        anyhow::bail!("the worker count must be at least 1");
    }
    if job.run.root >= workers {
        anyhow::bail!(
            "run.root = {} is not a rank of a {}-worker run",
            job.run.root,
            workers
        );
    }

    let backend = create_backend(&job.run)?;
    println!("Backend: {}", backend.device_info().name);
    println!(
        "Grid: {} x {} over x=[{}, {}] y=[{}, {}], maxiter {} ({:?} precision)",
        viewport.width,
        viewport.height,
        viewport.xmin,
        viewport.xmax,
        viewport.ymin,
        viewport.ymax,
        viewport.maxiter,
        viewport.precision
    );
    println!(
        "Workers: {} (collector rank {}, {:?} partition)",
        workers, job.run.root, job.run.partition
    );

    let options = RunOptions {
        root: job.run.root,
        strategy: job.run.partition,
    };
    let started = Instant::now();
    let run = run_local(&viewport, workers, backend, &options)?;
    log::info!("run finished in {:.3}s", started.elapsed().as_secs_f64());

    Ok(JobOutput {
        viewport,
        workers,
        run,
    })
}

/// Create the compute backend shared by every worker.
pub fn create_backend(run: &RunConfig) -> Result<Arc<dyn ComputeBackend>> {
    match run.backend.as_str() {
        "serial" => Ok(Arc::new(SerialBackend::new())),
        "cpu" if run.threads == 0 => Ok(Arc::new(CpuBackend::new())),
        "cpu" => Ok(Arc::new(CpuBackend::with_threads(run.threads)?)),
        other => anyhow::bail!("Unknown backend '{}'. Valid backends: cpu, serial", other),
    }
}

/// Print the per-worker runtime table.
pub fn print_timings(timings: &RunTimings) {
    for (rank, seconds) in timings.per_worker.iter().enumerate() {
        println!("Rank {:4}: ran for {:8.2}s", rank, seconds);
    }
    println!("max(runtime)  = {:8.2}s", timings.max);
    println!("min(runtime)  = {:8.2}s", timings.min);
    println!("mean(runtime) = {:8.2}s", timings.mean);
}

/// Print the row ranges of a partition.
pub fn print_partition(height: usize, workers: usize) -> Result<()> {
    let ranges = partition(height, workers)?;
    println!("{:>6} {:>10} {:>10} {:>10}", "rank", "start_row", "row_count", "end_row");
    for (rank, r) in ranges.iter().enumerate() {
        println!("{:>6} {:>10} {:>10} {:>10}", rank, r.start_row, r.row_count, r.end());
    }
    Ok(())
}

/// Write the matrix as CSV: one grid row per line, row 0 at `ymin`.
pub fn write_matrix_csv(matrix: &GlobalMatrix, path: &Path) -> Result<()> {
    use std::io::{BufWriter, Write};

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut file = BufWriter::new(std::fs::File::create(path)?);
    for row in matrix.cells.rows() {
        let line = row
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        writeln!(file, "{}", line)?;
    }
    file.flush()?;

    println!("Matrix written to: {}", path.display());
    Ok(())
}

/// Machine-readable description of a finished run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub version: &'static str,
    pub viewport: Viewport,
    pub workers: usize,
    pub root: usize,
    pub partition_strategy: PartitionStrategy,
    pub partition: Vec<RowRange>,
    pub max_value: Option<u32>,
    pub timings: RunTimings,
}

impl RunSummary {
    pub fn new(output: &JobOutput, job: &JobConfig) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            viewport: output.viewport,
            workers: output.workers,
            root: job.run.root,
            partition_strategy: job.run.partition,
            partition: output.run.reports.iter().map(|r| r.range).collect(),
            max_value: output.run.global.max_value(),
            timings: output.run.timings.clone(),
        }
    }
}

/// Write the run summary as JSON.
pub fn write_summary_json(summary: &RunSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| anyhow::anyhow!("JSON serialisation error: {}", e))?;
    std::fs::write(path, json)?;

    println!("Summary written to: {}", path.display());
    Ok(())
}
