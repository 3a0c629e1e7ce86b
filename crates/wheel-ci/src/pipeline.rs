//! Wheel build orchestration.
//!
//! `resolve version → [build ACL] → clean → bdist_wheel → complete wheel →
//! [bundle CUDA libraries]`. Stages run one at a time and the first failure
//! aborts the build.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::acl::build_acl;
use crate::artifact::{complete_wheel, relocate, remove_dir_if_empty, sha256_file};
use crate::build_vars::BuildVars;
use crate::cuda::{bundled_libraries, update_wheel};
use crate::error::Result;
use crate::layout::BuildLayout;
use crate::runner::{CommandExecutor, StageRecorder, StageResult};
use crate::stage::{BuiltinStage, StageConfig};
use crate::version::{resolve_version, PackageVersion};

/// Switches and environment inputs for one build.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Build oneDNN with the Arm Compute Library backend.
    pub enable_mkldnn: bool,

    /// Build with CUDA and bundle the CUDA runtime into the wheel.
    pub enable_cuda: bool,

    /// Value of `OVERRIDE_PACKAGE_VERSION`.
    pub override_version: Option<String>,

    /// Caller's `LD_LIBRARY_PATH`, kept at the end of the ACL search path.
    pub inherited_ld_library_path: Option<String>,

    /// Timeout applied to every external stage (0 = none).
    pub stage_timeout_secs: u64,
}

/// Summary of a finished build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub build_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub version: PackageVersion,
    pub build_vars: BuildVars,
    pub mkldnn: bool,
    pub cuda: bool,
    pub stages: Vec<StageResult>,
    /// Published wheel inside the artifacts directory.
    pub artifact: PathBuf,
    pub artifact_sha256: String,
    pub duration_ms: u64,
}

impl BuildReport {
    /// File name of the published wheel.
    pub fn artifact_name(&self) -> String {
        self.artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Write the report as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Build variables for `version` and `options`, in stage order.
pub fn assemble_build_vars(
    layout: &BuildLayout,
    version: &PackageVersion,
    options: &BuildOptions,
) -> BuildVars {
    let mut vars = BuildVars::base();
    vars.add_version(version);
    if options.enable_mkldnn {
        vars.add_acl(layout, options.inherited_ld_library_path.as_deref());
    }
    if options.enable_cuda {
        vars.add_cuda(layout);
    }
    vars
}

/// Wheel build orchestrator.
pub struct WheelPipeline;

impl WheelPipeline {
    /// Build, repair and publish the wheel for the checkout in `layout`.
    pub async fn run(
        layout: &BuildLayout,
        options: &BuildOptions,
        executor: &dyn CommandExecutor,
    ) -> Result<BuildReport> {
        let layout = &layout.absolute()?;
        let start = Instant::now();
        let started_at = Utc::now();
        let build_id = Uuid::new_v4();
        let recorder = StageRecorder::new(executor).with_default_timeout(options.stage_timeout_secs);

        info!(build_id = %build_id, source = ?layout.source_dir, "Building PyTorch wheel");

        let version =
            resolve_version(options.override_version.as_deref(), &recorder, layout).await?;

        if options.enable_mkldnn {
            build_acl(layout, &recorder).await?;
            info!("Building PyTorch with mkldnn+acl backend");
        } else {
            info!("Building PyTorch without mkldnn backend");
        }

        let build_vars = assemble_build_vars(layout, &version, options);
        info!(version = %version, build_vars = %build_vars, "Assembled build variables");

        let clean = StageConfig::from_builtin(BuiltinStage::SetupClean, ["setup.py", "clean"])
            .in_dir(&layout.source_dir)
            .inherit_output();
        recorder.run(&clean).await?;

        let bdist = StageConfig::from_builtin(BuiltinStage::BdistWheel, ["setup.py", "bdist_wheel"])
            .in_dir(&layout.source_dir)
            .with_env(build_vars.iter())
            .inherit_output();
        recorder.run(&bdist).await?;

        let wheel_name = complete_wheel(&layout.source_dir, &layout.artifacts_dir, &recorder).await?;
        let artifact = layout.artifacts_dir.join(&wheel_name);
        info!(wheel = %wheel_name, "Build complete");

        if options.enable_cuda {
            info!("Bundling CUDA runtime libraries");
            let repacked = update_wheel(&artifact, &bundled_libraries(layout), &recorder).await?;
            relocate(&repacked, &artifact)?;
            if let Some(staging) = repacked.parent() {
                remove_dir_if_empty(staging);
            }
        }

        let artifact_sha256 = sha256_file(&artifact)?;
        let duration_ms = start.elapsed().as_millis() as u64;
        info!(artifact = ?artifact, sha256 = %artifact_sha256, duration_ms, "Wheel published");

        Ok(BuildReport {
            build_id,
            started_at,
            version,
            build_vars,
            mkldnn: options.enable_mkldnn,
            cuda: options.enable_cuda,
            stages: recorder.results(),
            artifact,
            artifact_sha256,
            duration_ms,
        })
    }
}
