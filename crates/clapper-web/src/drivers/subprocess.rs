//! Local-subprocess stage driver: auto-edit, topic segmentation and
//! cut-srt building, each invoked as a CLI subprocess that prints
//! `RENDER_PROGRESS_PCT=<float>` progress lines to stdout (spec.md §6.2).

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::{DriverError, DriverResult, ProgressCallback};

/// Drives stages as local subprocesses. `program` is the CLI entrypoint
/// the stage is invoked through; each stage maps to one of its
/// subcommands.
pub struct SubprocessDriver {
    pub program: PathBuf,
}

impl SubprocessDriver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        SubprocessDriver { program: program.into() }
    }

    async fn run_stage(
        &self,
        args: &[&std::ffi::OsStr],
        stage: &str,
        progress: &ProgressCallback,
    ) -> DriverResult<()> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(pct) = line.strip_prefix("RENDER_PROGRESS_PCT=") {
                    if let Ok(ratio) = pct.trim().parse::<f64>() {
                        progress(stage, Some(ratio));
                    }
                }
            }
        }

        let status = child.wait().await?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(DriverError::NonZeroExit(code)),
            None => Err(DriverError::Terminated),
        }
    }

    pub async fn auto_edit(&self, srt_path: &Path, progress: &ProgressCallback) -> DriverResult<PathBuf> {
        let optimized_path = srt_path.with_file_name("optimized.srt");
        self.run_stage(
            &[
                std::ffi::OsStr::new("auto-edit"),
                srt_path.as_os_str(),
                optimized_path.as_os_str(),
            ],
            "auto_edit",
            progress,
        )
        .await?;
        Ok(optimized_path)
    }

    pub async fn topic_segment(
        &self,
        cut_srt_path: &Path,
        output_path: &Path,
        progress: &ProgressCallback,
    ) -> DriverResult<PathBuf> {
        self.run_stage(
            &[
                std::ffi::OsStr::new("topic-segment"),
                cut_srt_path.as_os_str(),
                output_path.as_os_str(),
            ],
            "topic_segment",
            progress,
        )
        .await?;
        Ok(output_path.to_path_buf())
    }

    pub async fn build_cut_srt(
        &self,
        optimized_srt_path: &Path,
        output_path: &Path,
        merge_gap: f64,
    ) -> DriverResult<PathBuf> {
        let gap_arg = merge_gap.to_string();
        let no_progress: ProgressCallback = Box::new(|_, _| {});
        self.run_stage(
            &[
                std::ffi::OsStr::new("build-cut-srt"),
                optimized_srt_path.as_os_str(),
                output_path.as_os_str(),
                std::ffi::OsStr::new(&gap_arg),
            ],
            "build_cut_srt",
            &no_progress,
        )
        .await?;
        Ok(output_path.to_path_buf())
    }
}
