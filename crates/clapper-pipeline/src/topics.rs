//! Algorithm B — topic line-id remapping, and invariant I7 verification.

use std::collections::HashSet;

use crate::error::{PipelineError, Result};
use crate::model::{Step1Line, Step2Chapter};

/// Kept step1 ids: all `line_id`s where `user_final_remove == false`, in
/// ascending order (spec.md §4.9 Algorithm B).
pub fn kept_line_ids(lines: &[Step1Line]) -> Vec<i64> {
    let mut ids: Vec<i64> = lines
        .iter()
        .filter(|l| !l.user_final_remove)
        .map(|l| l.line_id)
        .collect();
    ids.sort_unstable();
    ids
}

/// Remap each chapter's raw line-id list onto the kept step1 id set, then
/// fill any kept id that ended up orphaned by appending it to the chapter
/// whose max id first exceeds it (or the last chapter). Mutates `chapters`
/// in place; each chapter's final `line_ids` is sorted ascending.
pub fn remap_chapter_line_ids(chapters: &mut [Step2Chapter], kept: &[i64]) {
    let kept_set: HashSet<i64> = kept.iter().copied().collect();

    for chapter in chapters.iter_mut() {
        let mut seen = HashSet::new();
        let mut remapped = Vec::new();
        for &raw_id in &chapter.line_ids {
            let mapped = if kept_set.contains(&raw_id) {
                Some(raw_id)
            } else if raw_id >= 1 && (raw_id as usize) <= kept.len() {
                Some(kept[(raw_id - 1) as usize])
            } else {
                None
            };
            if let Some(id) = mapped {
                if seen.insert(id) {
                    remapped.push(id);
                }
            }
        }
        chapter.line_ids = remapped;
    }

    // Fill gaps: every kept id not yet assigned to any chapter is appended
    // to the chapter whose current max id first exceeds it, else the last
    // chapter.
    let assigned: HashSet<i64> = chapters.iter().flat_map(|c| c.line_ids.iter().copied()).collect();
    let missing: Vec<i64> = kept.iter().copied().filter(|id| !assigned.contains(id)).collect();

    if !chapters.is_empty() {
        for id in missing {
            let target = chapters
                .iter()
                .position(|c| c.line_ids.iter().any(|&existing| existing > id))
                .unwrap_or(chapters.len() - 1);
            chapters[target].line_ids.push(id);
        }
    }

    for chapter in chapters.iter_mut() {
        chapter.line_ids.sort_unstable();
    }
}

/// Verify invariant I7: chapters cover every kept step1 line exactly once,
/// in timeline order (each chapter's own `line_ids` already sorted, and no
/// id appears in more than one chapter).
pub fn verify_chapter_coverage(chapters: &[Step2Chapter], kept: &[i64]) -> Result<()> {
    let mut all_assigned: Vec<i64> = Vec::new();
    let mut seen = HashSet::new();
    for chapter in chapters {
        for &id in &chapter.line_ids {
            if !seen.insert(id) {
                return Err(PipelineError::ChapterCoverage(format!(
                    "line_id {id} assigned to more than one chapter"
                )));
            }
            all_assigned.push(id);
        }
    }
    all_assigned.sort_unstable();
    let mut kept_sorted = kept.to_vec();
    kept_sorted.sort_unstable();
    if all_assigned != kept_sorted {
        return Err(PipelineError::ChapterCoverage(
            "chapter line_ids do not equal the kept step1 line_id set".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(id: i64, ids: &[i64]) -> Step2Chapter {
        Step2Chapter {
            chapter_id: id,
            title: format!("ch{id}"),
            summary: String::new(),
            start_sec: 0.0,
            end_sec: 0.0,
            line_ids: ids.to_vec(),
        }
    }

    #[test]
    fn positional_mapping_for_small_ids() {
        // kept = [10, 20, 30]; raw id 2 maps positionally to kept[1] = 20.
        let kept = vec![10, 20, 30];
        let mut chapters = vec![chapter(1, &[2])];
        remap_chapter_line_ids(&mut chapters, &kept);
        assert_eq!(chapters[0].line_ids, vec![20]);
    }

    #[test]
    fn exact_kept_id_passes_through() {
        let kept = vec![10, 20, 30];
        let mut chapters = vec![chapter(1, &[10, 30])];
        remap_chapter_line_ids(&mut chapters, &kept);
        assert_eq!(chapters[0].line_ids, vec![10, 30]);
    }

    #[test]
    fn out_of_range_id_is_dropped() {
        let kept = vec![10, 20];
        let mut chapters = vec![chapter(1, &[99])];
        remap_chapter_line_ids(&mut chapters, &kept);
        assert!(chapters[0].line_ids.is_empty());
    }

    #[test]
    fn gap_filled_into_chapter_whose_max_exceeds_it() {
        let kept = vec![1, 2, 3, 4, 5];
        let mut chapters = vec![chapter(1, &[1, 3]), chapter(2, &[5])];
        // id 2 and 4 are unassigned after remap; 2 goes before ch1's max (3)
        // is exceeded... but ch1 already contains 3 so its max is 3 > 2,
        // and ch2's max is 5 > 4, so 4 goes in ch2.
        remap_chapter_line_ids(&mut chapters, &kept);
        assert_eq!(chapters[0].line_ids, vec![1, 2, 3]);
        assert_eq!(chapters[1].line_ids, vec![4, 5]);
        verify_chapter_coverage(&chapters, &kept).unwrap();
    }

    #[test]
    fn dedup_preserves_single_assignment() {
        let kept = vec![1, 2];
        let mut chapters = vec![chapter(1, &[1, 1, 2])];
        remap_chapter_line_ids(&mut chapters, &kept);
        assert_eq!(chapters[0].line_ids, vec![1, 2]);
    }

    #[test]
    fn coverage_rejects_duplicate_assignment() {
        let chapters = vec![chapter(1, &[1, 2]), chapter(2, &[2, 3])];
        let err = verify_chapter_coverage(&chapters, &[1, 2, 3]);
        assert!(err.is_err());
    }
}
