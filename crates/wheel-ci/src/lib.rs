//! Wheel CI - aarch64 PyTorch wheel builds inside a CI container
//!
//! Drives the external tools that turn a PyTorch checkout into a portable
//! aarch64 wheel:
//! - Resolves the package version from the checkout and environment
//! - Optionally builds the Arm Compute Library backend for oneDNN
//! - Builds the wheel, repairs it with auditwheel and publishes it
//! - Optionally bundles CUDA runtime libraries into the published wheel

pub mod acl;
pub mod artifact;
pub mod build_vars;
pub mod cuda;
pub mod error;
pub mod fakes;
pub mod git;
pub mod layout;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod version;

// Re-export key types
pub use artifact::{complete_wheel, list_dir, single_entry};
pub use build_vars::BuildVars;
pub use cuda::update_wheel;
pub use error::{Result, WheelCiError};
pub use layout::BuildLayout;
pub use pipeline::{BuildOptions, BuildReport, WheelPipeline};
pub use runner::{CommandExecutor, ProcessRunner, StageRecorder, StageResult};
pub use stage::{OutputMode, StageConfig};
pub use telemetry::init_tracing;
pub use version::{resolve_version, PackageVersion};
