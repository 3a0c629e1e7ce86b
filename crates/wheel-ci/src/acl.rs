//! Arm Compute Library build for the oneDNN backend.
//!
//! Clones a pinned ACL release, relaxes its ISA requirement from armv8.2-a
//! to armv8-a so the wheel runs on older cores, builds it with scons and
//! installs the headers and sources oneDNN needs.

use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, WheelCiError};
use crate::layout::BuildLayout;
use crate::runner::CommandExecutor;
use crate::stage::{BuiltinStage, StageConfig};

pub const ACL_REPO_URL: &str = "https://github.com/ARM-software/ComputeLibrary.git";
pub const ACL_VERSION_TAG: &str = "v23.05.1";

/// Flags that keep the clone small.
pub const SHALLOW_CLONE_FLAGS: [&str; 3] = ["--depth", "1", "--shallow-submodules"];

/// Checkout directories copied into the install directory.
pub const ACL_INSTALL_DIRS: [&str; 5] = ["arm_compute", "include", "utils", "support", "src"];

/// A literal text substitution in one file of the ACL checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsaPatch {
    pub file: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

pub const ISA_PATCHES: [IsaPatch; 3] = [
    IsaPatch {
        file: "SConscript",
        from: "\"armv8.2-a\"",
        to: "\"armv8-a\"",
    },
    IsaPatch {
        file: "SConstruct",
        from: "-march=armv8.2-a+fp16",
        to: "-march=armv8-a",
    },
    IsaPatch {
        file: "filedefs.json",
        from: "\"-march=armv8.2-a\"",
        to: "\"-march=armv8-a\"",
    },
];

/// scons arguments for a native multi-ISA OpenMP build into `build_dir`.
pub fn scons_args(build_dir: &Path) -> Vec<String> {
    let mut args: Vec<String> = [
        "Werror=1",
        "-j8",
        "debug=0",
        "neon=1",
        "opencl=0",
        "os=linux",
        "openmp=1",
        "cppthreads=0",
        "arch=armv8.2-a",
        "multi_isa=1",
        "build=native",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(format!("build_dir={}", build_dir.display()));
    args
}

/// Apply `patch` under `source_dir`, returning how many occurrences changed.
///
/// A missing file is an error; an absent pattern only warns, as an already
/// patched checkout has none left.
pub fn apply_patch(source_dir: &Path, patch: &IsaPatch) -> Result<usize> {
    let path = source_dir.join(patch.file);
    if !path.is_file() {
        return Err(WheelCiError::PatchTarget(path));
    }

    let contents = std::fs::read_to_string(&path)?;
    let count = contents.matches(patch.from).count();
    if count == 0 {
        warn!(file = %patch.file, pattern = %patch.from, "Patch pattern not found");
        return Ok(0);
    }

    std::fs::write(&path, contents.replace(patch.from, patch.to))?;
    Ok(count)
}

/// Apply all [`ISA_PATCHES`].
pub fn apply_isa_patches(source_dir: &Path) -> Result<usize> {
    let mut total = 0;
    for patch in &ISA_PATCHES {
        total += apply_patch(source_dir, patch)?;
    }
    Ok(total)
}

/// Recursively copy `src` to `dst`, returning the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(std::io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            copied += 1;
        } else {
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    let link = std::fs::read_link(src)?;
    if dst.symlink_metadata().is_ok() {
        std::fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst).map(|_| ())
}

/// Build the Arm Compute Library and install it into `layout.acl_dir`.
pub async fn build_acl(layout: &BuildLayout, executor: &dyn CommandExecutor) -> Result<PathBuf> {
    let layout = &layout.absolute()?;
    info!(tag = ACL_VERSION_TAG, install_dir = ?layout.acl_dir, "Building Arm Compute Library");
    std::fs::create_dir_all(&layout.acl_dir)?;

    let mut clone_args: Vec<String> = vec![
        "clone".to_string(),
        ACL_REPO_URL.to_string(),
        "-b".to_string(),
        ACL_VERSION_TAG.to_string(),
    ];
    clone_args.extend(SHALLOW_CLONE_FLAGS.iter().map(|s| s.to_string()));
    clone_args.push(layout.acl_source_dir.to_string_lossy().into_owned());
    executor
        .run(&StageConfig::from_builtin(BuiltinStage::AclClone, clone_args).inherit_output())
        .await?;

    let patched = apply_isa_patches(&layout.acl_source_dir)?;
    info!(occurrences = patched, "Relaxed ACL ISA requirement to armv8-a");

    let scons = StageConfig::from_builtin(BuiltinStage::AclScons, scons_args(&layout.acl_build_dir()))
        .in_dir(&layout.acl_source_dir)
        .inherit_output();
    executor.run(&scons).await?;

    for dir in ACL_INSTALL_DIRS {
        let files = copy_tree(&layout.acl_source_dir.join(dir), &layout.acl_dir.join(dir))?;
        info!(dir, files, "Installed ACL directory");
    }

    Ok(layout.acl_dir.clone())
}
