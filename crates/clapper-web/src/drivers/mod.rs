//! Stage driver interface (spec.md §6.2): the out-of-process collaborators
//! the worker invokes for transcription, auto-edit, topic segmentation and
//! cut-srt building. No teacher file owns an analogous abstraction — the
//! shape follows spec.md §9's translation note ("duck-typed stage drivers
//! → an interface with run() and a Progress channel").
//!
//! Per the recorded Open Question decision (DESIGN.md "ASR backend"),
//! `transcribe` is served exclusively by [`dashscope`]'s cloud
//! file-transcription API; the remaining three stages go through
//! [`subprocess::SubprocessDriver`], a local CLI collaborator.

pub mod dashscope;
pub mod subprocess;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use dashscope::{DashscopeAsrDriver, DashscopeOptions};
pub use subprocess::SubprocessDriver;

/// `report(stage, ratio)`; `ratio` is `None` when a driver can't estimate
/// completion fraction yet (spec.md §4.5 "Progress reporting").
pub type ProgressCallback = Box<dyn Fn(&str, Option<f64>) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("stage subprocess exited with status {0}")]
    NonZeroExit(i32),
    #[error("stage subprocess was terminated by a signal")]
    Terminated,
    #[error("stage http call failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("stage io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("asr task failed: {0}")]
    AsrFailed(String),
    #[error("asr task timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("malformed srt: {0}")]
    Srt(#[from] clapper_pipeline::PipelineError),
}

pub type DriverResult<T> = Result<T, DriverError>;

#[async_trait]
pub trait StageDriver: Send + Sync {
    async fn transcribe(&self, audio_path: &Path, progress: &ProgressCallback) -> DriverResult<PathBuf>;

    async fn auto_edit(&self, srt_path: &Path, progress: &ProgressCallback) -> DriverResult<PathBuf>;

    async fn topic_segment(
        &self,
        cut_srt_path: &Path,
        output_path: &Path,
        progress: &ProgressCallback,
    ) -> DriverResult<PathBuf>;

    async fn build_cut_srt(
        &self,
        optimized_srt_path: &Path,
        output_path: &Path,
        merge_gap: f64,
    ) -> DriverResult<PathBuf>;
}

/// Composes the cloud ASR driver with the local subprocess driver: the
/// combination the worker actually dispatches through.
pub struct CompositeDriver {
    pub asr: DashscopeAsrDriver,
    pub local: SubprocessDriver,
}

impl CompositeDriver {
    pub fn new(asr: DashscopeAsrDriver, local: SubprocessDriver) -> Self {
        CompositeDriver { asr, local }
    }
}

#[async_trait]
impl StageDriver for CompositeDriver {
    async fn transcribe(&self, audio_path: &Path, progress: &ProgressCallback) -> DriverResult<PathBuf> {
        self.asr.transcribe(audio_path, progress).await
    }

    async fn auto_edit(&self, srt_path: &Path, progress: &ProgressCallback) -> DriverResult<PathBuf> {
        self.local.auto_edit(srt_path, progress).await
    }

    async fn topic_segment(
        &self,
        cut_srt_path: &Path,
        output_path: &Path,
        progress: &ProgressCallback,
    ) -> DriverResult<PathBuf> {
        self.local.topic_segment(cut_srt_path, output_path, progress).await
    }

    async fn build_cut_srt(
        &self,
        optimized_srt_path: &Path,
        output_path: &Path,
        merge_gap: f64,
    ) -> DriverResult<PathBuf> {
        self.local.build_cut_srt(optimized_srt_path, output_path, merge_gap).await
    }
}
