//! Package version resolution.
//!
//! Precedence: explicit override, then the nightly scheme for `nightly` and
//! `master`, then the release scheme for `v1.*`/`v2.*` branches. Anything
//! else leaves the version to `setup.py`.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, WheelCiError};
use crate::git;
use crate::layout::BuildLayout;
use crate::runner::CommandExecutor;

/// Environment variable that pins the package version.
pub const OVERRIDE_VERSION_ENV: &str = "OVERRIDE_PACKAGE_VERSION";

const NIGHTLY_BRANCHES: [&str; 2] = ["nightly", "master"];
const RELEASE_BRANCH_PREFIXES: [&str; 2] = ["v1.", "v2."];

/// Version the wheel is built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageVersion {
    /// Taken verbatim from `OVERRIDE_PACKAGE_VERSION`.
    Override { version: String },

    /// `<base>.dev<date>` for nightly and master builds.
    Nightly { base: String, date: String },

    /// Parsed from a release branch name.
    Release { version: String },

    /// No version is passed; `setup.py` decides.
    Default,
}

impl PackageVersion {
    /// Value for `PYTORCH_BUILD_VERSION`, if this version sets one.
    pub fn build_version(&self) -> Option<String> {
        match self {
            PackageVersion::Override { version } | PackageVersion::Release { version } => {
                Some(version.clone())
            }
            PackageVersion::Nightly { base, date } => Some(format!("{base}.dev{date}")),
            PackageVersion::Default => None,
        }
    }
}

impl std::fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.build_version() {
            Some(v) => write!(f, "{v}"),
            None => write!(f, "<setup.py default>"),
        }
    }
}

pub fn is_nightly_branch(branch: &str) -> bool {
    NIGHTLY_BRANCHES.contains(&branch)
}

/// Version encoded in a release branch name: `v2.1.0-rc1` gives `2.1.0`.
///
/// Returns `None` for branches outside `v1.*`/`v2.*`.
pub fn release_version_from_branch(branch: &str) -> Option<String> {
    if !RELEASE_BRANCH_PREFIXES.iter().any(|p| branch.starts_with(p)) {
        return None;
    }
    let rest = &branch[1..];
    let version = rest.split_once('-').map_or(rest, |(v, _)| v);
    Some(version.to_string())
}

/// Base version from `version.txt` contents with the two-character
/// pre-release suffix dropped: `2.2.0a0` gives `2.2.0`.
pub fn nightly_base_version(version_txt: &str) -> Result<String> {
    let trimmed = version_txt.trim();
    let mut chars = trimmed.chars();
    chars.next_back();
    chars.next_back();
    let base = chars.as_str();
    if base.is_empty() {
        return Err(WheelCiError::Version(format!(
            "version.txt holds no usable version: {trimmed:?}"
        )));
    }
    Ok(base.to_string())
}

/// `2023-10-05` becomes `20231005`.
pub fn compact_commit_date(date: &str) -> String {
    date.trim().replace('-', "")
}

/// Resolve the package version for the checkout in `layout`.
///
/// With a non-blank `override_version` no git query is made.
pub async fn resolve_version(
    override_version: Option<&str>,
    executor: &dyn CommandExecutor,
    layout: &BuildLayout,
) -> Result<PackageVersion> {
    if let Some(version) = override_version.map(str::trim).filter(|v| !v.is_empty()) {
        info!(version = %version, "Using {}", OVERRIDE_VERSION_ENV);
        return Ok(PackageVersion::Override {
            version: version.to_string(),
        });
    }

    let branch = git::current_branch(executor, &layout.source_dir).await?;
    debug!(branch = %branch, "Resolved source branch");

    if is_nightly_branch(&branch) {
        let contents = tokio::fs::read_to_string(layout.version_file()).await?;
        let base = nightly_base_version(&contents)?;
        let date = compact_commit_date(&git::head_commit_date(executor, &layout.source_dir).await?);
        let version = PackageVersion::Nightly { base, date };
        info!(branch = %branch, version = %version, "Using nightly version");
        return Ok(version);
    }

    if let Some(version) = release_version_from_branch(&branch) {
        info!(branch = %branch, version = %version, "Using release branch version");
        return Ok(PackageVersion::Release { version });
    }

    info!(branch = %branch, "No version override for branch");
    Ok(PackageVersion::Default)
}
