//! Environment variables passed to `setup.py bdist_wheel`.
//!
//! Variables accumulate in a fixed order: linker flags, version, Arm Compute
//! Library, CUDA. They are handed to the build process directly, so values
//! need no shell quoting; [`BuildVars::render`] quotes only for display.

use serde::{Serialize, Serializer};
use std::path::Path;

use crate::layout::BuildLayout;
use crate::stage::quote_arg;
use crate::version::PackageVersion;

/// Linker flags applied to every build.
pub const BASE_LINKER_FLAGS: &str = "-Wl,-z,max-page-size=0x10000";

/// CUDA architectures the wheel is compiled for.
pub const TORCH_CUDA_ARCH_LIST: &str = "5.0;6.0;7.0;7.5;8.0;8.6;3.7;9.0";

/// Ordered `KEY=VALUE` pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildVars {
    vars: Vec<(String, String)>,
}

impl BuildVars {
    /// Variables every build starts with.
    pub fn base() -> Self {
        let mut vars = Self::default();
        vars.push("CMAKE_SHARED_LINKER_FLAGS", BASE_LINKER_FLAGS);
        vars
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.push((key.into(), value.into()));
    }

    /// Add the version variables. [`PackageVersion::Default`] adds nothing.
    pub fn add_version(&mut self, version: &PackageVersion) {
        if let Some(build_version) = version.build_version() {
            self.push("BUILD_TEST", "0");
            self.push("PYTORCH_BUILD_VERSION", build_version);
            self.push("PYTORCH_BUILD_NUMBER", "1");
        }
    }

    /// Add the oneDNN + Arm Compute Library variables.
    ///
    /// `inherited_ld_path` is the caller's `LD_LIBRARY_PATH`, appended after
    /// the build's own library directories.
    pub fn add_acl(&mut self, layout: &BuildLayout, inherited_ld_path: Option<&str>) {
        let acl_build = layout.acl_build_dir();
        let mut ld_path = join_paths(&[&layout.build_lib_dir(), &acl_build]);
        if let Some(inherited) = inherited_ld_path.filter(|p| !p.is_empty()) {
            ld_path.push(':');
            ld_path.push_str(inherited);
        }

        self.push("USE_MKLDNN", "ON");
        self.push("USE_MKLDNN_ACL", "ON");
        self.push("ACL_ROOT_DIR", layout.acl_dir.to_string_lossy());
        self.push("LD_LIBRARY_PATH", ld_path);
        self.push("ACL_INCLUDE_DIR", acl_build.to_string_lossy());
        self.push("ACL_LIBRARY", acl_build.to_string_lossy());
    }

    /// Add the CUDA build variables.
    pub fn add_cuda(&mut self, layout: &BuildLayout) {
        self.push("TORCH_NVCC_FLAGS", "-Xfatbin -compress-all --threads 2");
        self.push("USE_STATIC_CUDNN", "0");
        self.push("NCCL_ROOT_DIR", layout.cuda_home.to_string_lossy());
        self.push("TH_BINARY_BUILD", "1");
        self.push("USE_STATIC_NCCL", "1");
        self.push("ATEN_STATIC_CUDA", "1");
        self.push("USE_CUDA_STATIC_LINK", "1");
        self.push("INSTALL_TEST", "0");
        self.push("USE_CUPTI_SO", "0");
        self.push("TORCH_CUDA_ARCH_LIST", TORCH_CUDA_ARCH_LIST);
        self.push("EXTRA_CAFFE2_CMAKE_FLAGS", "-DATEN_NO_TEST=ON");
    }

    /// Last value set for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> Vec<&str> {
        self.vars.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Space-separated `KEY=VALUE` string, as a shell prefix would read.
    pub fn render(&self) -> String {
        self.vars
            .iter()
            .map(|(k, v)| format!("{k}={}", quote_arg(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for BuildVars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

impl Serialize for BuildVars {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.render())
    }
}

fn join_paths(paths: &[&Path]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(":")
}
