//! Filesystem layout shared with the CI container image.
//!
//! The container mounts the PyTorch checkout at `/pytorch` and collects
//! finished wheels from `/artifacts`. Every path is overridable so the
//! pipeline can run against a scratch directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

pub const DEFAULT_SOURCE_DIR: &str = "/pytorch";
pub const DEFAULT_ACL_DIR: &str = "/acl";
pub const DEFAULT_ACL_SOURCE_DIR: &str = "/ComputeLibrary";
pub const DEFAULT_ARTIFACTS_DIR: &str = "/artifacts";
pub const DEFAULT_CUDA_HOME: &str = "/usr/local/cuda";
pub const DEFAULT_CONDA_LIB_DIR: &str = "/opt/conda/lib";

/// Paths the wheel build reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildLayout {
    /// PyTorch source checkout.
    pub source_dir: PathBuf,

    /// Arm Compute Library install directory.
    pub acl_dir: PathBuf,

    /// Arm Compute Library source checkout.
    pub acl_source_dir: PathBuf,

    /// Where finished wheels are collected.
    pub artifacts_dir: PathBuf,

    /// CUDA toolkit root.
    pub cuda_home: PathBuf,

    /// Conda runtime libraries (OpenBLAS, OpenMP, gfortran).
    pub conda_lib_dir: PathBuf,
}

impl Default for BuildLayout {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from(DEFAULT_SOURCE_DIR),
            acl_dir: PathBuf::from(DEFAULT_ACL_DIR),
            acl_source_dir: PathBuf::from(DEFAULT_ACL_SOURCE_DIR),
            artifacts_dir: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            cuda_home: PathBuf::from(DEFAULT_CUDA_HOME),
            conda_lib_dir: PathBuf::from(DEFAULT_CONDA_LIB_DIR),
        }
    }
}

impl BuildLayout {
    /// Layout with every directory placed under `root`, mirroring the
    /// container's top-level names.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            source_dir: root.join("pytorch"),
            acl_dir: root.join("acl"),
            acl_source_dir: root.join("ComputeLibrary"),
            artifacts_dir: root.join("artifacts"),
            cuda_home: root.join("usr/local/cuda"),
            conda_lib_dir: root.join("opt/conda/lib"),
        }
    }

    /// Same layout with relative paths resolved against the current
    /// directory. Stages run in their own working directories, so paths
    /// handed to a tool must not depend on where it runs.
    pub fn absolute(&self) -> Result<Self> {
        Ok(Self {
            source_dir: absolute_path(&self.source_dir)?,
            acl_dir: absolute_path(&self.acl_dir)?,
            acl_source_dir: absolute_path(&self.acl_source_dir)?,
            artifacts_dir: absolute_path(&self.artifacts_dir)?,
            cuda_home: absolute_path(&self.cuda_home)?,
            conda_lib_dir: absolute_path(&self.conda_lib_dir)?,
        })
    }

    /// Final component of the source directory (`pytorch` by default).
    pub fn package_folder(&self) -> String {
        self.source_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Where `setup.py bdist_wheel` drops its wheel.
    pub fn dist_dir(&self) -> PathBuf {
        self.source_dir.join("dist")
    }

    /// Where `auditwheel repair` drops the repaired wheel.
    pub fn wheelhouse_dir(&self) -> PathBuf {
        self.source_dir.join("wheelhouse")
    }

    pub fn version_file(&self) -> PathBuf {
        self.source_dir.join("version.txt")
    }

    /// Native libraries produced by the PyTorch build.
    pub fn build_lib_dir(&self) -> PathBuf {
        self.source_dir.join("build").join("lib")
    }

    /// Arm Compute Library build output.
    pub fn acl_build_dir(&self) -> PathBuf {
        self.acl_dir.join("build")
    }

    pub fn cuda_lib_dir(&self) -> PathBuf {
        self.cuda_home.join("lib64")
    }
}

/// `path` itself when absolute, otherwise joined onto the current directory.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}
