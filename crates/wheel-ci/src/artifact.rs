//! Wheel discovery, repair and relocation.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, WheelCiError};
use crate::runner::CommandExecutor;
use crate::stage::{BuiltinStage, StageConfig};

/// Packages whose folder name contains this are repaired with auditwheel.
pub const REPAIRED_PACKAGE: &str = "pytorch";

/// Sorted names of the visible entries in `dir`.
pub fn list_dir(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// The only entry in `dir`.
///
/// Fails with [`WheelCiError::NoArtifact`] when `dir` is missing or empty and
/// [`WheelCiError::AmbiguousArtifact`] when it holds more than one entry.
pub fn single_entry(dir: &Path) -> Result<String> {
    let mut names = match list_dir(dir) {
        Ok(names) => names,
        Err(WheelCiError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WheelCiError::NoArtifact(dir.to_path_buf()));
        }
        Err(e) => return Err(e),
    };

    match names.len() {
        0 => Err(WheelCiError::NoArtifact(dir.to_path_buf())),
        1 => Ok(names.remove(0)),
        _ => Err(WheelCiError::AmbiguousArtifact {
            dir: dir.to_path_buf(),
            entries: names,
        }),
    }
}

/// Move `src` to `dst`, copying when a rename is not possible (for example
/// across filesystems).
pub fn relocate(src: &Path, dst: &Path) -> Result<()> {
    if let Err(e) = std::fs::rename(src, dst) {
        debug!(src = ?src, dst = ?dst, error = %e, "Rename failed, copying instead");
        std::fs::copy(src, dst)?;
        std::fs::remove_file(src)?;
    }
    Ok(())
}

/// Move the file `src` into `dst_dir`, keeping its name.
pub fn move_into(src: &Path, dst_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .ok_or_else(|| WheelCiError::NoArtifact(src.to_path_buf()))?;
    std::fs::create_dir_all(dst_dir)?;
    let dst = dst_dir.join(name);
    relocate(src, &dst)?;
    Ok(dst)
}

pub fn needs_repair(folder: &Path) -> bool {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().contains(REPAIRED_PACKAGE))
        .unwrap_or(false)
}

/// Finish a wheel build in `folder` and publish it to `artifacts_dir`.
///
/// Takes the single wheel in `<folder>/dist`. For PyTorch it is repaired with
/// auditwheel and the repaired wheel from `<folder>/wheelhouse` replaces it.
/// Returns the published file name.
pub async fn complete_wheel(
    folder: &Path,
    artifacts_dir: &Path,
    executor: &dyn CommandExecutor,
) -> Result<String> {
    let dist_dir = folder.join("dist");
    let wheel_name = single_entry(&dist_dir)?;

    let repaired_name = if needs_repair(folder) {
        info!(wheel = %wheel_name, "Repairing wheel with auditwheel");
        let stage = StageConfig::from_builtin(
            BuiltinStage::AuditwheelRepair,
            ["repair".to_string(), format!("dist/{wheel_name}")],
        )
        .in_dir(folder)
        .inherit_output();
        executor.run(&stage).await?;

        let wheelhouse = folder.join("wheelhouse");
        let repaired_name = single_entry(&wheelhouse)?;

        info!(wheel = %repaired_name, dist = ?dist_dir, "Moving repaired wheel to dist");
        move_into(&wheelhouse.join(&repaired_name), &dist_dir)?;
        repaired_name
    } else {
        wheel_name
    };

    info!(wheel = %repaired_name, artifacts = ?artifacts_dir, "Copying wheel to artifacts");
    move_into(&dist_dir.join(&repaired_name), artifacts_dir)?;

    Ok(repaired_name)
}

/// Hex SHA-256 of the file at `path`.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Remove `dir` if it exists and is empty.
pub(crate) fn remove_dir_if_empty(dir: &Path) {
    match std::fs::remove_dir(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = ?dir, error = %e, "Could not remove staging directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingExecutor;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"wheel").unwrap();
    }

    #[test]
    fn list_dir_is_sorted_and_hides_dotfiles() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("b.whl"));
        touch(&dir.path().join("a.whl"));
        touch(&dir.path().join(".hidden"));
        assert_eq!(list_dir(dir.path()).unwrap(), vec!["a.whl", "b.whl"]);
    }

    #[test]
    fn single_entry_validates_count() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            single_entry(dir.path()),
            Err(WheelCiError::NoArtifact(_))
        ));
        assert!(matches!(
            single_entry(&dir.path().join("missing")),
            Err(WheelCiError::NoArtifact(_))
        ));

        touch(&dir.path().join("pkg.whl"));
        assert_eq!(single_entry(dir.path()).unwrap(), "pkg.whl");

        touch(&dir.path().join("other.whl"));
        match single_entry(dir.path()) {
            Err(WheelCiError::AmbiguousArtifact { entries, .. }) => {
                assert_eq!(entries, vec!["other.whl", "pkg.whl"]);
            }
            other => panic!("expected AmbiguousArtifact, got {:?}", other),
        }
    }

    #[test]
    fn needs_repair_matches_folder_name() {
        assert!(needs_repair(Path::new("/pytorch")));
        assert!(needs_repair(Path::new("/work/pytorch-src")));
        assert!(!needs_repair(Path::new("/vision")));
    }

    #[test]
    fn move_into_creates_destination() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("dist/pkg.whl");
        touch(&src);

        let dst = move_into(&src, &dir.path().join("artifacts")).unwrap();
        assert_eq!(dst, dir.path().join("artifacts/pkg.whl"));
        assert!(dst.exists());
        assert!(!src.exists());
    }

    #[tokio::test]
    async fn complete_wheel_repairs_pytorch() {
        let root = tempdir().unwrap();
        let folder = root.path().join("pytorch");
        let artifacts = root.path().join("artifacts");
        touch(&folder.join("dist/pkg.whl"));

        let fake = RecordingExecutor::new().on_stage("auditwheel_repair", |stage| {
            let folder = stage.cwd.clone().unwrap();
            std::fs::create_dir_all(folder.join("wheelhouse"))?;
            std::fs::write(folder.join("wheelhouse/pkg-manylinux.whl"), b"repaired")
        });

        let name = complete_wheel(&folder, &artifacts, &fake).await.unwrap();

        assert_eq!(name, "pkg-manylinux.whl");
        assert!(artifacts.join("pkg-manylinux.whl").exists());
        assert!(list_dir(&folder.join("wheelhouse")).unwrap().is_empty());

        let call = fake.last_call("auditwheel_repair").unwrap();
        assert_eq!(call.command, vec!["auditwheel", "repair", "dist/pkg.whl"]);
        assert_eq!(call.cwd.as_deref(), Some(folder.as_path()));
    }

    #[tokio::test]
    async fn complete_wheel_skips_repair_for_other_packages() {
        let root = tempdir().unwrap();
        let folder = root.path().join("vision");
        let artifacts = root.path().join("artifacts");
        touch(&folder.join("dist/vision.whl"));

        let fake = RecordingExecutor::new();
        let name = complete_wheel(&folder, &artifacts, &fake).await.unwrap();

        assert_eq!(name, "vision.whl");
        assert!(artifacts.join("vision.whl").exists());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn complete_wheel_fails_without_wheel() {
        let root = tempdir().unwrap();
        let folder = root.path().join("pytorch");
        std::fs::create_dir_all(folder.join("dist")).unwrap();

        let fake = RecordingExecutor::new();
        let err = complete_wheel(&folder, &root.path().join("artifacts"), &fake)
            .await
            .unwrap_err();
        assert!(matches!(err, WheelCiError::NoArtifact(_)));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_repair_stops_before_move() {
        let root = tempdir().unwrap();
        let folder = root.path().join("pytorch");
        touch(&folder.join("dist/pkg.whl"));

        let fake = RecordingExecutor::new().failing("auditwheel_repair", 1);
        let err = complete_wheel(&folder, &root.path().join("artifacts"), &fake)
            .await
            .unwrap_err();

        assert!(matches!(err, WheelCiError::CommandFailed { .. }));
        assert!(folder.join("dist/pkg.whl").exists());
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
