//! On-disk job directory layout (spec.md §6.6) and cleanup's artifact-path
//! collection/dedup helpers. Ported from `original_source/web_api/services/
//! cleanup.py::_collect_artifact_paths` / `_dedupe_paths`.

use std::path::{Path, PathBuf};

use crate::guard::is_within;
use crate::model::JobFiles;

/// The four subtrees every job directory contains (§6.6).
pub struct JobDirs {
    pub base: PathBuf,
    pub input: PathBuf,
    pub step1: PathBuf,
    pub step2: PathBuf,
    pub render: PathBuf,
}

impl JobDirs {
    pub fn new(work_dir: &Path, job_id: &str) -> Self {
        let base = work_dir.join("jobs").join(job_id);
        JobDirs {
            input: base.join("input"),
            step1: base.join("step1"),
            step2: base.join("step2"),
            render: base.join("render"),
            base,
        }
    }

    pub fn meta_path(&self) -> PathBuf {
        self.base.join("job.meta.json")
    }

    pub fn files_path(&self) -> PathBuf {
        self.base.join("job.files.json")
    }

    pub fn error_path(&self) -> PathBuf {
        self.base.join("job.error.json")
    }
}

/// Collect every artifact path declared for a job, filtered to those that
/// resolve inside the work directory, plus the job's own base directory.
/// Paths outside the work directory are skipped (the caller should log a
/// warning); never deleted.
pub fn collect_artifact_paths(work_dir: &Path, job_dir: &Path, files: &JobFiles) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = files
        .declared_paths()
        .into_iter()
        .map(PathBuf::from)
        .filter(|p| is_within(work_dir, p))
        .collect();
    if is_within(work_dir, job_dir) {
        out.push(job_dir.to_path_buf());
    }
    out
}

/// Sort by path depth descending (deepest first) and remove duplicates by
/// their lexically-normalized string form, so a directory is listed after
/// its own children and no path is processed twice.
pub fn dedupe_paths(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.to_string_lossy().into_owned()));
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_skips_paths_outside_work_dir() {
        let work_dir = Path::new("/work");
        let job_dir = Path::new("/work/jobs/job_abc");
        let mut files = JobFiles::default();
        files.audio_path = Some("/work/jobs/job_abc/input/a.wav".into());
        files.srt_path = Some("/etc/passwd".into());
        let paths = collect_artifact_paths(work_dir, job_dir, &files);
        assert!(paths.iter().any(|p| p.ends_with("a.wav")));
        assert!(!paths.iter().any(|p| p == Path::new("/etc/passwd")));
        assert!(paths.contains(&job_dir.to_path_buf()));
    }

    #[test]
    fn dedupe_sorts_deepest_first_and_removes_duplicates() {
        let paths = vec![
            PathBuf::from("/work/jobs/job_abc"),
            PathBuf::from("/work/jobs/job_abc/input/a.wav"),
            PathBuf::from("/work/jobs/job_abc"),
        ];
        let deduped = dedupe_paths(paths);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0], PathBuf::from("/work/jobs/job_abc/input/a.wav"));
    }
}
