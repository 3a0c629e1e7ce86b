//! aarch64-wheel-build - PyTorch aarch64 wheel builder for CI
//!
//! Builds the wheel for the checkout mounted in the CI container, optionally
//! with the Arm Compute Library backend and bundled CUDA runtime, and leaves
//! the repaired wheel in the artifacts directory.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use wheel_ci::layout::{
    DEFAULT_ACL_DIR, DEFAULT_ACL_SOURCE_DIR, DEFAULT_ARTIFACTS_DIR, DEFAULT_CONDA_LIB_DIR,
    DEFAULT_CUDA_HOME, DEFAULT_SOURCE_DIR,
};
use wheel_ci::telemetry::log_level;
use wheel_ci::version::OVERRIDE_VERSION_ENV;
use wheel_ci::{init_tracing, BuildLayout, BuildOptions, BuildReport, ProcessRunner, WheelPipeline};

#[derive(Parser, Debug)]
#[command(name = "aarch64-wheel-build")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "AARCH64 wheels python CD", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Only build, leave testing to the CI driver
    #[arg(long)]
    build_only: bool,

    /// Test-only selector, passed through to the CI driver
    #[arg(long, value_name = "STR")]
    test_only: Option<String>,

    /// Build oneDNN with the Arm Compute Library backend
    #[arg(long)]
    enable_mkldnn: bool,

    /// Build with CUDA and bundle the CUDA runtime into the wheel
    #[arg(long)]
    enable_cuda: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Write a JSON build report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Timeout for each external stage in seconds (0 = none)
    #[arg(long, default_value_t = 0)]
    stage_timeout: u64,

    /// Package version, bypassing branch detection
    #[arg(long, env = OVERRIDE_VERSION_ENV, hide_env_values = true)]
    override_version: Option<String>,

    /// PyTorch source checkout
    #[arg(long, env = "WHEEL_CI_SOURCE_DIR", default_value = DEFAULT_SOURCE_DIR)]
    source_dir: PathBuf,

    /// Arm Compute Library install directory
    #[arg(long, env = "WHEEL_CI_ACL_DIR", default_value = DEFAULT_ACL_DIR)]
    acl_dir: PathBuf,

    /// Arm Compute Library source checkout
    #[arg(long, env = "WHEEL_CI_ACL_SOURCE_DIR", default_value = DEFAULT_ACL_SOURCE_DIR)]
    acl_source_dir: PathBuf,

    /// Directory collecting finished wheels
    #[arg(long, env = "WHEEL_CI_ARTIFACTS_DIR", default_value = DEFAULT_ARTIFACTS_DIR)]
    artifacts_dir: PathBuf,

    /// CUDA toolkit root
    #[arg(long, env = "WHEEL_CI_CUDA_HOME", default_value = DEFAULT_CUDA_HOME)]
    cuda_home: PathBuf,

    /// Conda runtime library directory
    #[arg(long, env = "WHEEL_CI_CONDA_LIB_DIR", default_value = DEFAULT_CONDA_LIB_DIR)]
    conda_lib_dir: PathBuf,
}

impl Cli {
    fn layout(&self) -> BuildLayout {
        BuildLayout {
            source_dir: self.source_dir.clone(),
            acl_dir: self.acl_dir.clone(),
            acl_source_dir: self.acl_source_dir.clone(),
            artifacts_dir: self.artifacts_dir.clone(),
            cuda_home: self.cuda_home.clone(),
            conda_lib_dir: self.conda_lib_dir.clone(),
        }
    }

    fn options(&self) -> BuildOptions {
        BuildOptions {
            enable_mkldnn: self.enable_mkldnn,
            enable_cuda: self.enable_cuda,
            override_version: self.override_version.clone(),
            inherited_ld_library_path: std::env::var("LD_LIBRARY_PATH").ok(),
            stage_timeout_secs: self.stage_timeout,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json, log_level(cli.debug));

    info!(
        build_only = cli.build_only,
        test_only = ?cli.test_only,
        mkldnn = cli.enable_mkldnn,
        cuda = cli.enable_cuda,
        "Starting aarch64 wheel build"
    );

    let layout = cli.layout();
    let report = WheelPipeline::run(&layout, &cli.options(), &ProcessRunner)
        .await
        .context("Wheel build failed")?;

    print_summary(&report);

    if let Some(path) = &cli.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write build report to {}", path.display()))?;
        println!("Report: {}", path.display());
    }

    Ok(())
}

fn print_summary(report: &BuildReport) {
    println!("Build Complete. Created {}", report.artifact_name());
    println!("Build ID: {}", report.build_id);
    println!("Version: {}", report.version);
    println!("Artifact: {}", report.artifact.display());
    println!("SHA-256: {}", report.artifact_sha256);
    println!("Duration: {}ms", report.duration_ms);
    println!();

    for stage in &report.stages {
        let status = if stage.passed() { "✓" } else { "✗" };
        println!(
            "  {} {} ({}ms, exit code: {})",
            status, stage.stage_name, stage.duration_ms, stage.exit_code
        );
    }
}
