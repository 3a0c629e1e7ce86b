//! CUDA runtime bundling.
//!
//! Unpacks a built wheel, copies the CUDA, BLAS, OpenMP and Fortran runtime
//! libraries next to `libtorch_cuda.so`, points its rpath at `$ORIGIN` and
//! repacks the wheel.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, WheelCiError};
use crate::layout::{absolute_path, BuildLayout};
use crate::runner::CommandExecutor;
use crate::stage::{BuiltinStage, StageConfig};

/// Library whose rpath is rewritten to find the bundled copies.
pub const RPATH_TARGET: &str = "libtorch_cuda.so";

/// Libraries taken from the CUDA toolkit's `lib64`.
pub const CUDA_LIBRARIES: [&str; 7] = [
    "libcudnn.so.8",
    "libcublas.so.11",
    "libcublasLt.so.11",
    "libcudart.so.11.0",
    "libnvToolsExt.so.1",
    "libnvrtc.so.11.2",
    "libnvrtc-builtins.so.11.8",
];

/// Libraries taken from the conda environment.
pub const CONDA_LIBRARIES: [&str; 3] = ["libgfortran.so.5", "libopenblas.so.0", "libgomp.so.1"];

/// Full paths of every library to bundle, CUDA first.
pub fn bundled_libraries(layout: &BuildLayout) -> Vec<PathBuf> {
    let cuda_dir = layout.cuda_lib_dir();
    CUDA_LIBRARIES
        .iter()
        .map(|name| cuda_dir.join(name))
        .chain(CONDA_LIBRARIES.iter().map(|name| layout.conda_lib_dir.join(name)))
        .collect()
}

/// Bundle `libraries` into the wheel at `wheel_path`.
///
/// Works in `<dir>/tmp`, which must not already exist and is removed
/// afterwards whether or not repacking succeeded. Returns the repacked wheel,
/// written to `<dir>/new_wheel/<name>`.
pub async fn update_wheel(
    wheel_path: &Path,
    libraries: &[PathBuf],
    executor: &dyn CommandExecutor,
) -> Result<PathBuf> {
    let wheel_path = &absolute_path(wheel_path)?;
    let folder = wheel_path
        .parent()
        .ok_or_else(|| WheelCiError::NoArtifact(wheel_path.to_path_buf()))?;
    let filename = wheel_path
        .file_name()
        .ok_or_else(|| WheelCiError::NoArtifact(wheel_path.to_path_buf()))?;

    let unpack_dir = folder.join("tmp");
    std::fs::create_dir(&unpack_dir)?;

    let result = repack(wheel_path, filename, folder, &unpack_dir, libraries, executor).await;

    if let Err(e) = std::fs::remove_dir_all(&unpack_dir) {
        if result.is_ok() {
            return Err(e.into());
        }
        warn!(dir = ?unpack_dir, error = %e, "Could not remove unpack directory");
    }

    result
}

async fn repack(
    wheel_path: &Path,
    filename: &std::ffi::OsStr,
    folder: &Path,
    unpack_dir: &Path,
    libraries: &[PathBuf],
    executor: &dyn CommandExecutor,
) -> Result<PathBuf> {
    if let Some(missing) = libraries.iter().find(|lib| !lib.is_file()) {
        return Err(WheelCiError::MissingLibrary(missing.clone()));
    }

    let unzip = StageConfig::from_builtin(
        BuiltinStage::UnzipWheel,
        [
            "-q".to_string(),
            wheel_path.to_string_lossy().into_owned(),
            "-d".to_string(),
            unpack_dir.to_string_lossy().into_owned(),
        ],
    );
    executor.run(&unzip).await?;

    let lib_dir = unpack_dir.join("torch").join("lib");
    std::fs::create_dir_all(&lib_dir)?;
    for lib in libraries {
        if let Some(name) = lib.file_name() {
            std::fs::copy(lib, lib_dir.join(name))?;
        }
    }
    info!(count = libraries.len(), lib_dir = ?lib_dir, "Bundled runtime libraries");

    let patchelf = StageConfig::from_builtin(
        BuiltinStage::PatchelfRpath,
        [
            "--set-rpath".to_string(),
            "$ORIGIN".to_string(),
            lib_dir.join(RPATH_TARGET).to_string_lossy().into_owned(),
        ],
    )
    .in_dir(&lib_dir);
    executor.run(&patchelf).await?;

    let out_dir = folder.join("new_wheel");
    std::fs::create_dir_all(&out_dir)?;
    let out_path = out_dir.join(filename);
    if out_path.exists() {
        std::fs::remove_file(&out_path)?;
    }

    let zip = StageConfig::from_builtin(
        BuiltinStage::ZipWheel,
        [
            "-q".to_string(),
            "-r".to_string(),
            out_path.to_string_lossy().into_owned(),
            ".".to_string(),
        ],
    )
    .in_dir(unpack_dir);
    executor.run(&zip).await?;

    info!(wheel = ?out_path, "Repacked wheel");
    Ok(out_path)
}
