//! CPU compute backend using Rayon for shared-memory parallelism.

use ndarray::Array2;
use rayon::prelude::*;

use crate::backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo};

/// CPU backend that parallelises work across threads via Rayon.
///
/// By default it runs on the global Rayon pool. [`CpuBackend::with_threads`]
/// builds a dedicated pool, which keeps several workers in one process from
/// oversubscribing the machine.
pub struct CpuBackend {
    num_threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl CpuBackend {
    /// Create a new CPU backend using all available threads.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            pool: None,
        }
    }

    /// Create a CPU backend with its own pool of `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, ComputeError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("mandelmesh-cpu-{}", i))
            .build()
            .map_err(|e| ComputeError::Unavailable(e.to_string()))?;
        Ok(Self {
            num_threads: pool.current_num_threads(),
            pool: Some(pool),
        })
    }

    fn fill(
        rows: usize,
        cols: usize,
        fill_fn: &(dyn Fn(usize, usize) -> u32 + Send + Sync),
    ) -> Result<Array2<u32>, ComputeError> {
        let data: Vec<u32> = (0..rows * cols)
            .into_par_iter()
            .map(|idx| {
                let i = idx / cols;
                let j = idx % cols;
                fill_fn(i, j)
            })
            .collect();

        Array2::from_shape_vec((rows, cols), data).map_err(|e| ComputeError::Shape(e.to_string()))
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn parallel_grid_fill(
        &self,
        rows: usize,
        cols: usize,
        fill_fn: &(dyn Fn(usize, usize) -> u32 + Send + Sync),
    ) -> Result<Array2<u32>, ComputeError> {
        match &self.pool {
            Some(pool) => pool.install(|| Self::fill(rows, cols, fill_fn)),
            None => Self::fill(rows, cols, fill_fn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SerialBackend;

    #[test]
    fn test_cpu_matches_serial() {
        let f = |i: usize, j: usize| ((i * 31 + j * 7) % 97) as u32;
        let cpu = CpuBackend::new().parallel_grid_fill(17, 23, &f).unwrap();
        let serial = SerialBackend::new().parallel_grid_fill(17, 23, &f).unwrap();
        assert_eq!(cpu, serial);
    }

    #[test]
    fn test_dedicated_pool_reports_thread_count() {
        let cpu = CpuBackend::with_threads(2).unwrap();
        let info = cpu.device_info();
        assert_eq!(info.backend_type, BackendType::Cpu);
        assert_eq!(info.compute_units, Some(2));
        let m = cpu.parallel_grid_fill(4, 4, &|i, j| (i + j) as u32).unwrap();
        assert_eq!(m[[3, 3]], 6);
    }
}
