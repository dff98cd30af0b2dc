//! TOML configuration deserialisation for grid jobs.

use anyhow::{bail, Context};
use mandelmesh_core::types::{Precision, Viewport};
use mandelmesh_core::PartitionStrategy;
use serde::Deserialize;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub viewport: ViewportConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Region and resolution. Either a named preset, explicit bounds, or a
/// preset with some fields overridden.
#[derive(Debug, Default, Deserialize)]
pub struct ViewportConfig {
    /// Preset name: "full" or "seahorse".
    pub preset: Option<String>,
    pub xmin: Option<f64>,
    pub xmax: Option<f64>,
    pub ymin: Option<f64>,
    pub ymax: Option<f64>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub maxiter: Option<u32>,
    #[serde(default)]
    pub precision: Precision,
}

/// How the job is executed.
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Number of workers (ranks). Default: 4.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Rank that collects the result. Default: 0.
    #[serde(default)]
    pub root: usize,
    /// "closed-form" or "scan". Default: "closed-form".
    #[serde(default)]
    pub partition: PartitionStrategy,
    /// Compute backend: "cpu" or "serial". Default: "cpu".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Size of the Rayon pool shared by all workers with the "cpu" backend;
    /// 0 uses the global pool.
    #[serde(default)]
    pub threads: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            root: 0,
            partition: PartitionStrategy::default(),
            backend: default_backend(),
            threads: 0,
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_backend() -> String {
    "cpu".into()
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    /// Whether to save the matrix as CSV (default: true).
    #[serde(default = "default_true")]
    pub save_matrix: bool,
    /// Whether to save a JSON run summary (default: false).
    #[serde(default)]
    pub save_summary: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            save_matrix: true,
            save_summary: false,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl ViewportConfig {
    /// Resolve the preset and overrides into a validated viewport.
    pub fn to_viewport(&self) -> anyhow::Result<Viewport> {
        let base = match &self.preset {
            Some(name) => Some(Viewport::preset(name)?),
            None => None,
        };

        let pick_f64 = |value: Option<f64>, from_base: Option<f64>, name: &str| {
            value
                .or(from_base)
                .with_context(|| format!("viewport.{} is required without a preset", name))
        };

        let xmin = pick_f64(self.xmin, base.map(|b| b.xmin), "xmin")?;
        let xmax = pick_f64(self.xmax, base.map(|b| b.xmax), "xmax")?;
        let ymin = pick_f64(self.ymin, base.map(|b| b.ymin), "ymin")?;
        let ymax = pick_f64(self.ymax, base.map(|b| b.ymax), "ymax")?;
        let width = self
            .width
            .or(base.map(|b| b.width))
            .context("viewport.width is required without a preset")?;
        let height = self
            .height
            .or(base.map(|b| b.height))
            .context("viewport.height is required without a preset")?;
        let maxiter = self
            .maxiter
            .or(base.map(|b| b.maxiter))
            .context("viewport.maxiter is required without a preset")?;

        let viewport = Viewport::new(xmin, xmax, ymin, ymax, width, height, maxiter)?;
        Ok(viewport.with_precision(self.precision))
    }
}

impl JobConfig {
    /// Check everything that can be checked before launching workers.
    pub fn validate(&self) -> anyhow::Result<Viewport> {
        let viewport = self.viewport.to_viewport()?;
        if self.run.workers == 0 {
            bail!("run.workers must be at least 1");
        }
        if self.run.root >= self.run.workers {
            bail!(
                "run.root = {} is not a rank of a {}-worker run",
                self.run.root,
                self.run.workers
            );
        }
        match self.run.backend.as_str() {
            "cpu" | "serial" => {}
            other => bail!("Unknown backend '{}'. Valid backends: cpu, serial", other),
        }
        Ok(viewport)
    }
}

/// Parse a TOML job configuration string.
pub fn parse_config(content: &str) -> anyhow::Result<JobConfig> {
    let config: JobConfig = toml::from_str(content)?;
    Ok(config)
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_with_overrides() {
        let job = parse_config(
            r#"
            [viewport]
            preset = "full"
            width = 64
            height = 48
            "#,
        )
        .unwrap();
        let vp = job.validate().unwrap();
        assert_eq!((vp.width, vp.height, vp.maxiter), (64, 48, 80));
        assert_eq!(vp.xmin, -2.0);
        assert_eq!(job.run.workers, 4);
        assert_eq!(job.run.partition, PartitionStrategy::ClosedForm);
        assert!(job.output.save_matrix);
        assert!(!job.output.save_summary);
    }

    #[test]
    fn test_explicit_bounds_and_run_section() {
        let job = parse_config(
            r#"
            [viewport]
            xmin = -0.74877
            xmax = -0.74872
            ymin = 0.06505
            ymax = 0.06510
            width = 300
            height = 300
            maxiter = 2048
            precision = "single"

            [run]
            workers = 6
            root = 5
            partition = "scan"
            backend = "serial"

            [output]
            directory = "out"
            save_summary = true
            "#,
        )
        .unwrap();
        let vp = job.validate().unwrap();
        assert_eq!(vp.precision, Precision::Single);
        assert_eq!(job.run.partition, PartitionStrategy::Scan);
        assert_eq!(job.run.root, 5);
        assert_eq!(job.output.directory, "out");
    }

    #[test]
    fn test_missing_bounds_without_preset() {
        let job = parse_config(
            r#"
            [viewport]
            xmin = -2.0
            width = 10
            height = 10
            maxiter = 10
            "#,
        )
        .unwrap();
        let err = job.validate().unwrap_err().to_string();
        assert!(err.contains("viewport.xmax"), "{}", err);
    }

    #[test]
    fn test_invalid_run_settings() {
        let base = "[viewport]\npreset = \"full\"\n";
        let job = parse_config(&format!("{}[run]\nworkers = 0\n", base)).unwrap();
        assert!(job.validate().is_err());
        let job = parse_config(&format!("{}[run]\nworkers = 2\nroot = 2\n", base)).unwrap();
        assert!(job.validate().is_err());
        let job = parse_config(&format!("{}[run]\nbackend = \"gpu\"\n", base)).unwrap();
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_degenerate_viewport_rejected() {
        let job = parse_config(
            r#"
            [viewport]
            preset = "full"
            ymin = 1.0
            ymax = 1.0
            "#,
        )
        .unwrap();
        assert!(job.validate().is_err());
    }
}
