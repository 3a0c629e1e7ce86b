//! Pipeline run with a layout given relative to the working directory.
//!
//! Kept in its own test binary because it changes the process's current
//! directory.

use std::path::{Path, PathBuf};

use wheel_ci::acl::ACL_INSTALL_DIRS;
use wheel_ci::cuda::{bundled_libraries, RPATH_TARGET};
use wheel_ci::fakes::RecordingExecutor;
use wheel_ci::stage::StageConfig;
use wheel_ci::{BuildLayout, BuildOptions, WheelPipeline};

const WHEEL: &str = "torch-2.1.0-cp310-cp310-linux_aarch64.whl";

/// Resolve a tool argument the way the tool itself would: against the
/// stage's working directory when it has one.
fn resolve(stage: &StageConfig, arg: &str) -> PathBuf {
    match &stage.cwd {
        Some(cwd) => cwd.join(arg),
        None => PathBuf::from(arg),
    }
}

fn not_found(path: &Path) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    )
}

fn cwd_sensitive_tools() -> RecordingExecutor {
    RecordingExecutor::new()
        .on_stage("acl_clone", |stage| {
            let checkout = resolve(stage, stage.command.last().unwrap());
            std::fs::create_dir_all(&checkout)?;
            for file in ["SConscript", "SConstruct", "filedefs.json"] {
                std::fs::write(checkout.join(file), "-march=armv8.2-a")?;
            }
            for dir in ACL_INSTALL_DIRS {
                std::fs::create_dir_all(checkout.join(dir))?;
                std::fs::write(checkout.join(dir).join("marker"), dir)?;
            }
            Ok(())
        })
        .on_stage("acl_scons", |stage| {
            let arg = stage
                .command
                .iter()
                .find_map(|a| a.strip_prefix("build_dir="))
                .unwrap();
            std::fs::create_dir_all(resolve(stage, arg))
        })
        .on_stage("bdist_wheel", |stage| {
            let dist = resolve(stage, "dist");
            std::fs::create_dir_all(&dist)?;
            std::fs::write(dist.join(WHEEL), b"built")
        })
        .on_stage("auditwheel_repair", |stage| {
            let wheelhouse = resolve(stage, "wheelhouse");
            std::fs::create_dir_all(&wheelhouse)?;
            std::fs::write(wheelhouse.join(WHEEL), b"repaired")
        })
        .on_stage("unzip_wheel", |stage| {
            let lib_dir = resolve(stage, &stage.command[4]).join("torch/lib");
            std::fs::create_dir_all(&lib_dir)?;
            std::fs::write(lib_dir.join(RPATH_TARGET), b"elf")
        })
        .on_stage("patchelf_rpath", |stage| {
            let target = resolve(stage, &stage.command[3]);
            if target.is_file() {
                Ok(())
            } else {
                Err(not_found(&target))
            }
        })
        .on_stage("zip_wheel", |stage| {
            std::fs::write(resolve(stage, &stage.command[3]), b"repacked with cuda")
        })
}

#[tokio::test]
async fn test_relative_layout_resolves_against_invocation_dir() {
    let root = tempfile::tempdir().unwrap();
    std::env::set_current_dir(root.path()).unwrap();

    let layout = BuildLayout::rooted_at(Path::new("ws"));
    assert!(layout.artifacts_dir.is_relative());
    std::fs::create_dir_all(&layout.source_dir).unwrap();
    for lib in bundled_libraries(&layout) {
        std::fs::create_dir_all(lib.parent().unwrap()).unwrap();
        std::fs::write(&lib, b"so").unwrap();
    }

    let fake = cwd_sensitive_tools();
    let options = BuildOptions {
        enable_mkldnn: true,
        enable_cuda: true,
        override_version: Some("2.1.0".to_string()),
        ..Default::default()
    };

    let report = WheelPipeline::run(&layout, &options, &fake)
        .await
        .expect("pipeline failed");

    let artifacts = root.path().join("ws/artifacts");
    assert!(report.artifact.is_absolute());
    assert_eq!(std::fs::read(artifacts.join(WHEEL)).unwrap(), b"repacked with cuda");
    assert!(!artifacts.join("tmp").exists());
    assert!(!artifacts.join("new_wheel").exists());

    assert!(root.path().join("ws/acl/build").is_dir());
    assert!(!root.path().join("ws/ComputeLibrary/ws").exists());

    let scons = fake.last_call("acl_scons").unwrap();
    let build_dir = scons
        .command
        .iter()
        .find_map(|a| a.strip_prefix("build_dir="))
        .unwrap();
    assert!(Path::new(build_dir).is_absolute());
}
