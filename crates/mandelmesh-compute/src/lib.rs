//! # Mandelmesh Compute
//!
//! Execution plumbing for the mandelmesh workspace. This crate provides a
//! [`ComputeBackend`](backend::ComputeBackend) trait that isolates the grid
//! code from how cells are scheduled on a worker, and a
//! [`Communicator`](distributed::Communicator) trait describing the
//! collectives workers use to exchange results.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | CPU (Rayon) | `cpu` (default) | Implemented |
//! | Serial | always | Implemented |
//! | In-process world ([`LocalWorld`]) | always | Implemented |

pub mod backend;

#[cfg(feature = "cpu")]
pub mod cpu;

pub mod distributed;

pub use backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, SerialBackend};
pub use distributed::{
    CollectiveError, Communicator, LocalCommunicator, LocalWorld, Operation,
};

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;
