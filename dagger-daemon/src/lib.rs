//! Reconcile loop runtime and the gcloud-backed control plane.

pub mod composer;
mod error;
mod runtime;

pub use composer::{parse_describe, parse_list_output, GcloudControlPlane};
pub use error::DaemonError;
pub use runtime::{
    block_on, init_tracing, run_loop, spawn_signal_handler, start_blocking, LoopStats,
};
