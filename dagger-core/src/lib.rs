//! dagger core library: domain types, collaborator seams, configuration.
//!
//! - [`types`]: `DagId`, `RelPath`, `RemoteRoot`, `ReconciliationPlan`
//! - [`error`]: per-concern error enums
//! - [`config`]: YAML config + flag overlay, validated into `EnvSettings`
//! - [`desired`]: the desired DAG list reader
//! - [`control`]: the [`ControlPlane`] trait
//! - [`store`]: the [`ObjectStore`] trait with filesystem and memory backends

pub mod config;
pub mod control;
pub mod desired;
pub mod error;
pub mod store;
pub mod types;

pub use config::{DaggerConfig, EnvSettings};
pub use control::ControlPlane;
pub use error::{ConfigError, ControlError, DesiredSetError, StoreError};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use types::{dag_set, DagId, DagSet, ReconciliationPlan, RelPath, RemoteRoot};
