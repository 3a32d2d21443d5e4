//! Job state machine: states, transitions, progress rungs, and
//! `infer_status` disk/metadata reconciliation.
//!
//! No teacher file defines a graph this shape (`magnetar::JobStatus` is a
//! flat 4-variant chunk enum); the `Display`/`FromStr` boilerplate idiom is
//! lifted from it, but the graph itself is new, built from spec.md §4.3.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Created,
    UploadReady,
    Step1Running,
    Step1Ready,
    Step1Confirmed,
    Step2Running,
    Step2Ready,
    Step2Confirmed,
    Succeeded,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Created => write!(f, "CREATED"),
            JobStatus::UploadReady => write!(f, "UPLOAD_READY"),
            JobStatus::Step1Running => write!(f, "STEP1_RUNNING"),
            JobStatus::Step1Ready => write!(f, "STEP1_READY"),
            JobStatus::Step1Confirmed => write!(f, "STEP1_CONFIRMED"),
            JobStatus::Step2Running => write!(f, "STEP2_RUNNING"),
            JobStatus::Step2Ready => write!(f, "STEP2_READY"),
            JobStatus::Step2Confirmed => write!(f, "STEP2_CONFIRMED"),
            JobStatus::Succeeded => write!(f, "SUCCEEDED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CREATED" => Ok(JobStatus::Created),
            "UPLOAD_READY" => Ok(JobStatus::UploadReady),
            "STEP1_RUNNING" => Ok(JobStatus::Step1Running),
            "STEP1_READY" => Ok(JobStatus::Step1Ready),
            "STEP1_CONFIRMED" => Ok(JobStatus::Step1Confirmed),
            "STEP2_RUNNING" => Ok(JobStatus::Step2Running),
            "STEP2_READY" => Ok(JobStatus::Step2Ready),
            "STEP2_CONFIRMED" => Ok(JobStatus::Step2Confirmed),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(PipelineError::IllegalTransition {
                from: other.to_string(),
                event: "parse".to_string(),
            }),
        }
    }
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Progress rung a freshly-entered state is assigned (§4.3). Values
    /// inside the two RUNNING states are a range; callers pass a ratio via
    /// `running_progress` instead of using this directly for those two.
    pub fn base_progress(&self) -> u8 {
        match self {
            JobStatus::Created => 0,
            JobStatus::UploadReady => 10,
            JobStatus::Step1Running => 11,
            JobStatus::Step1Ready => 35,
            JobStatus::Step1Confirmed => 45,
            JobStatus::Step2Running => 46,
            JobStatus::Step2Ready => 75,
            JobStatus::Step2Confirmed => 80,
            JobStatus::Succeeded => 100,
            JobStatus::Failed => 0, // caller keeps the job's last progress
        }
    }
}

/// Events that drive legal transitions (spec.md §4.3's state graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    UploadAudio,
    EnqueueStep1,
    Step1Success,
    Step1InsufficientCredits,
    Step1OtherFailure,
    ConfirmStep1,
    EnqueueStep2,
    Step2Success,
    Step2Failure,
    ConfirmStep2,
}

/// Apply `event` to `from`, returning the resulting state or an error if
/// the transition is illegal. Per I5, a failed transition must not mutate
/// the caller's stored row — this function is pure and has no side effect
/// regardless of outcome, so callers only persist on `Ok`.
pub fn transition(from: JobStatus, event: Event) -> Result<JobStatus> {
    use Event::*;
    use JobStatus::*;
    let to = match (from, event) {
        (Created, UploadAudio) => UploadReady,
        (UploadReady, UploadAudio) => UploadReady, // re-upload before running is harmless
        (UploadReady, EnqueueStep1) => Step1Running,
        (Step1Running, Step1Success) => Step1Ready,
        (Step1Running, Step1InsufficientCredits) => UploadReady,
        (Step1Running, Step1OtherFailure) => Failed,
        (Step1Ready, ConfirmStep1) => Step1Confirmed,
        (Step1Confirmed, EnqueueStep2) => Step2Running,
        (Step2Running, Step2Success) => Step2Ready,
        (Step2Running, Step2Failure) => Failed,
        (Step2Ready, ConfirmStep2) => Step2Confirmed,
        _ => {
            return Err(PipelineError::IllegalTransition {
                from: from.to_string(),
                event: format!("{event:?}"),
            })
        }
    };
    Ok(to)
}

/// Clamp a within-stage progress ratio (0.0-1.0) into the rung range for
/// `status`, per "progress is monotonic non-decreasing and clamped below
/// the next rung's floor."
pub fn running_progress(status: JobStatus, ratio: f64) -> u8 {
    let ratio = ratio.clamp(0.0, 1.0);
    let (floor, ceil) = match status {
        JobStatus::Step1Running => (11u8, 29u8),
        JobStatus::Step2Running => (46u8, 74u8),
        other => return other.base_progress(),
    };
    let span = (ceil - floor) as f64;
    floor + (ratio * span).round() as u8
}

/// Evidence observed on disk for a single job's base directory, per the
/// layout in spec.md §6.6. Each field is a plain existence check; the
/// caller (`clapper-store`/`clapper-web`) performs the `fs::metadata` calls
/// and hands in booleans so this module stays pure / unit-testable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskEvidence {
    pub has_error_json: bool,
    pub has_render_output: bool,
    pub has_step2_confirmed: bool,
    pub has_final_topics_json: bool,
    pub has_step1_confirmed: bool,
    pub has_final_step1_json: bool,
    pub has_input_audio: bool,
}

impl DiskEvidence {
    /// Infer the highest-reached state from disk alone (§4.3 steps 1-8).
    pub fn infer(&self) -> JobStatus {
        if self.has_error_json {
            JobStatus::Failed
        } else if self.has_render_output {
            JobStatus::Succeeded
        } else if self.has_step2_confirmed {
            JobStatus::Step2Confirmed
        } else if self.has_final_topics_json {
            JobStatus::Step2Ready
        } else if self.has_step1_confirmed {
            JobStatus::Step1Confirmed
        } else if self.has_final_step1_json {
            JobStatus::Step1Ready
        } else if self.has_input_audio {
            JobStatus::UploadReady
        } else {
            JobStatus::Created
        }
    }
}

/// `infer_status(job_id)`: reconcile `job.meta.json`'s stored status with
/// on-disk evidence. Runs on every GET (spec.md §4.3).
pub fn infer_status(meta_status: JobStatus, evidence: &DiskEvidence) -> JobStatus {
    let inferred = evidence.infer();
    match (meta_status, inferred) {
        (JobStatus::Step1Running, JobStatus::Created | JobStatus::UploadReady) => {
            JobStatus::Step1Running
        }
        (JobStatus::Step2Running, JobStatus::Step1Confirmed) => JobStatus::Step2Running,
        (JobStatus::Failed, other) if !other.is_terminal() => JobStatus::Failed,
        _ => inferred,
    }
}

/// Evidence-gathering helper: given a job's base directory, check the
/// conventional marker files named in spec.md §6.6. Kept here (rather than
/// in `clapper-store`) because the file names are part of the state-machine
/// contract, not an arbitrary storage detail.
pub fn evidence_from_disk(job_dir: &Path) -> DiskEvidence {
    DiskEvidence {
        has_error_json: job_dir.join("job.error.json").exists(),
        has_render_output: job_dir.join("render").join("output.mp4").exists(),
        has_step2_confirmed: job_dir.join("step2").join(".confirmed").exists(),
        has_final_topics_json: job_dir.join("step2").join("final_topics.json").exists(),
        has_step1_confirmed: job_dir.join("step1").join(".confirmed").exists(),
        has_final_step1_json: job_dir.join("step1").join("final_step1.json").exists(),
        has_input_audio: job_dir
            .join("input")
            .read_dir()
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut s = JobStatus::Created;
        s = transition(s, Event::UploadAudio).unwrap();
        assert_eq!(s, JobStatus::UploadReady);
        s = transition(s, Event::EnqueueStep1).unwrap();
        assert_eq!(s, JobStatus::Step1Running);
        s = transition(s, Event::Step1Success).unwrap();
        assert_eq!(s, JobStatus::Step1Ready);
        s = transition(s, Event::ConfirmStep1).unwrap();
        assert_eq!(s, JobStatus::Step1Confirmed);
        s = transition(s, Event::EnqueueStep2).unwrap();
        assert_eq!(s, JobStatus::Step2Running);
        s = transition(s, Event::Step2Success).unwrap();
        assert_eq!(s, JobStatus::Step2Ready);
        s = transition(s, Event::ConfirmStep2).unwrap();
        assert_eq!(s, JobStatus::Step2Confirmed);
    }

    #[test]
    fn insufficient_credits_reverts_to_upload_ready() {
        let s = transition(JobStatus::Step1Running, Event::Step1InsufficientCredits).unwrap();
        assert_eq!(s, JobStatus::UploadReady);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let err = transition(JobStatus::Created, Event::ConfirmStep1);
        assert!(err.is_err());
    }

    #[test]
    fn running_progress_is_clamped_below_next_rung() {
        assert_eq!(running_progress(JobStatus::Step1Running, 0.0), 11);
        assert_eq!(running_progress(JobStatus::Step1Running, 1.0), 29);
        assert_eq!(running_progress(JobStatus::Step2Running, 0.5), 46 + 14);
    }

    #[test]
    fn infer_status_prefers_error_json() {
        let ev = DiskEvidence {
            has_error_json: true,
            has_render_output: true,
            ..Default::default()
        };
        assert_eq!(infer_status(JobStatus::Step2Running, &ev), JobStatus::Failed);
    }

    #[test]
    fn infer_status_restart_recovery_scenario() {
        // Scenario 4: killed between final_step1.json write and meta update.
        let ev = DiskEvidence {
            has_final_step1_json: true,
            ..Default::default()
        };
        assert_eq!(
            infer_status(JobStatus::Step1Running, &ev),
            JobStatus::Step1Ready
        );
    }

    #[test]
    fn infer_status_reconciles_step2_running_from_step1_confirmed() {
        let ev = DiskEvidence {
            has_step1_confirmed: true,
            ..Default::default()
        };
        assert_eq!(
            infer_status(JobStatus::Step2Running, &ev),
            JobStatus::Step2Running
        );
    }

    #[test]
    fn infer_status_highest_reached_state_l5() {
        // L5: freshly created then partially populated should yield the
        // highest-reached state regardless of what meta says.
        let ev = DiskEvidence {
            has_step1_confirmed: true,
            has_final_step1_json: true,
            has_input_audio: true,
            ..Default::default()
        };
        assert_eq!(infer_status(JobStatus::Created, &ev), JobStatus::Step1Confirmed);
    }
}
