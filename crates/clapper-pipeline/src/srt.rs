//! SubRip (.srt) parsing/writing and Algorithm A (merge into Step1 Lines).
//!
//! Ported from `original_source/web_api/utils/srt_utils.py`: subtitles are
//! matched by `line_id` (the SRT cue index), not by position, so a cue
//! dropped or reordered by the optimizer doesn't silently misalign the
//! merge. Comments/behavior below mirror `_is_remove_text` /
//! `_strip_remove_token` / `build_step1_lines_from_srts`.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::error::{PipelineError, Result};
use crate::model::Step1Line;

/// Sentinel prefix the auto-edit driver places on lines it recommends
/// removing (GLOSSARY: REMOVE_TOKEN).
pub const REMOVE_TOKEN: &str = "<<REMOVE>>";

#[derive(Debug, Clone)]
pub struct SrtCue {
    pub index: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub content: String,
}

/// Parse `HH:MM:SS,mmm` into seconds.
fn parse_timestamp(raw: &str) -> Result<f64> {
    let raw = raw.trim();
    let (hms, millis) = raw
        .split_once(',')
        .ok_or_else(|| PipelineError::MalformedSrt(format!("bad timestamp: {raw}")))?;
    let mut parts = hms.split(':');
    let h: f64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PipelineError::MalformedSrt(format!("bad timestamp: {raw}")))?;
    let m: f64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PipelineError::MalformedSrt(format!("bad timestamp: {raw}")))?;
    let s: f64 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PipelineError::MalformedSrt(format!("bad timestamp: {raw}")))?;
    let ms: f64 = millis
        .parse()
        .map_err(|_| PipelineError::MalformedSrt(format!("bad timestamp: {raw}")))?;
    Ok(h * 3600.0 + m * 60.0 + s + ms / 1000.0)
}

fn format_timestamp(total_sec: f64) -> String {
    let total_sec = total_sec.max(0.0);
    let total_ms = (total_sec * 1000.0).round() as i64;
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    let s = total_s % 60;
    let total_m = total_s / 60;
    let m = total_m % 60;
    let h = total_m / 60;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Parse an SRT document's cue blocks (index line, timestamp line, content
/// lines, blank separator).
pub fn parse_srt(text: &str) -> Result<Vec<SrtCue>> {
    let mut cues = Vec::new();
    let normalized = text.replace("\r\n", "\n");
    for block in normalized.split("\n\n") {
        let block = block.trim();
        if block.is_empty() {
            continue;
        }
        let mut lines = block.lines();
        let index: i64 = lines
            .next()
            .ok_or_else(|| PipelineError::MalformedSrt("missing index line".into()))?
            .trim()
            .parse()
            .map_err(|_| PipelineError::MalformedSrt("non-numeric index".into()))?;
        let timing = lines
            .next()
            .ok_or_else(|| PipelineError::MalformedSrt("missing timing line".into()))?;
        let (start_raw, end_raw) = timing
            .split_once("-->")
            .ok_or_else(|| PipelineError::MalformedSrt(format!("bad timing line: {timing}")))?;
        let start_sec = parse_timestamp(start_raw)?;
        let end_sec = parse_timestamp(end_raw)?;
        let content = lines.collect::<Vec<_>>().join("\n");
        cues.push(SrtCue {
            index,
            start_sec,
            end_sec,
            content,
        });
    }
    Ok(cues)
}

/// Compose cues back into SRT text, preserving each cue's own index
/// (`reindex=False` in the Python original).
pub fn compose_srt(cues: &[SrtCue]) -> String {
    let mut out = String::new();
    for cue in cues {
        let _ = writeln!(out, "{}", cue.index);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_timestamp(cue.start_sec),
            format_timestamp(cue.end_sec)
        );
        let _ = writeln!(out, "{}", cue.content);
        let _ = writeln!(out);
    }
    out
}

fn is_remove_text(text: &str) -> bool {
    let value = text.trim();
    value.is_empty() || value.starts_with(REMOVE_TOKEN)
}

fn strip_remove_token(text: &str) -> String {
    let value = text.trim();
    if !value.starts_with(REMOVE_TOKEN) {
        return value.to_string();
    }
    value[REMOVE_TOKEN.len()..].trim().to_string()
}

/// Algorithm A — merge `original` and `optimized` SRT cues into Step1 Lines.
///
/// Cues are matched by `line_id` (the original cue's index, falling back to
/// its 1-based position if the index is non-positive), not by array
/// position: the optimizer is allowed to drop a cue entirely.
pub fn merge_step1_lines(original: &[SrtCue], optimized: &[SrtCue]) -> Vec<Step1Line> {
    let optimized_by_id: HashMap<i64, &SrtCue> =
        optimized.iter().map(|cue| (cue.index, cue)).collect();

    let mut lines: Vec<Step1Line> = original
        .iter()
        .enumerate()
        .map(|(i, cue)| {
            let line_id = if cue.index > 0 { cue.index } else { (i + 1) as i64 };
            let original_text = cue.content.trim().to_string();

            let (optimized_text, ai_suggest_remove) = match optimized_by_id.get(&line_id) {
                Some(opt) => {
                    let content = opt.content.trim();
                    let ai_suggest_remove = is_remove_text(content);
                    let content = if content.is_empty() {
                        original_text.as_str()
                    } else {
                        content
                    };
                    let stripped = strip_remove_token(content);
                    let optimized_text = if stripped.is_empty() {
                        original_text.clone()
                    } else {
                        stripped
                    };
                    (optimized_text, ai_suggest_remove)
                }
                None => (original_text.clone(), false),
            };

            Step1Line {
                line_id,
                start_sec: cue.start_sec,
                end_sec: cue.end_sec,
                original_text,
                optimized_text,
                ai_suggest_remove,
                user_final_remove: ai_suggest_remove,
            }
        })
        .collect();

    lines.sort_by_key(|line| line.line_id);
    lines
}

/// Rewrite `final_step1.srt` from the (possibly user-edited) line list, per
/// `write_final_step1_srt`: a kept-but-removed line keeps its original text
/// prefixed with REMOVE_TOKEN so a human re-reading the raw SRT can still
/// see what was cut; a surviving line uses its (possibly edited)
/// `optimized_text`. Lines with `end <= start` are dropped as malformed.
pub fn render_final_step1_srt(lines: &[Step1Line]) -> String {
    let mut sorted: Vec<&Step1Line> = lines.iter().collect();
    sorted.sort_by_key(|l| l.line_id);

    let cues: Vec<SrtCue> = sorted
        .into_iter()
        .filter(|line| line.end_sec > line.start_sec)
        .map(|line| {
            let original_text = line.original_text.trim();
            let optimized_text = {
                let t = line.optimized_text.trim();
                if t.is_empty() {
                    original_text
                } else {
                    t
                }
            };
            let content = if line.user_final_remove {
                format!("{REMOVE_TOKEN} {original_text}").trim().to_string()
            } else {
                optimized_text.to_string()
            };
            SrtCue {
                index: line.line_id,
                start_sec: line.start_sec,
                end_sec: line.end_sec,
                content,
            }
        })
        .collect();

    compose_srt(&cues)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cue(index: i64, start: f64, end: f64, content: &str) -> SrtCue {
        SrtCue {
            index,
            start_sec: start,
            end_sec: end,
            content: content.to_string(),
        }
    }

    #[test]
    fn parse_and_compose_round_trip() {
        let text = "1\n00:00:00,000 --> 00:00:01,500\nhello\n\n2\n00:00:01,500 --> 00:00:03,000\nworld\n\n";
        let cues = parse_srt(text).unwrap();
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].index, 1);
        assert!((cues[0].end_sec - 1.5).abs() < 1e-6);
        let composed = compose_srt(&cues);
        let reparsed = parse_srt(&composed).unwrap();
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed[1].content, "world");
    }

    #[test]
    fn merge_marks_ai_suggest_remove_on_empty_optimized() {
        let original = vec![cue(1, 0.0, 1.0, "hello there")];
        let optimized = vec![cue(1, 0.0, 1.0, "")];
        let lines = merge_step1_lines(&original, &optimized);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ai_suggest_remove);
        assert!(lines[0].user_final_remove);
        assert_eq!(lines[0].optimized_text, "hello there");
    }

    #[test]
    fn merge_strips_remove_token_prefix() {
        let original = vec![cue(1, 0.0, 1.0, "filler word")];
        let optimized = vec![cue(1, 0.0, 1.0, "<<REMOVE>> filler word")];
        let lines = merge_step1_lines(&original, &optimized);
        assert!(lines[0].ai_suggest_remove);
        assert_eq!(lines[0].optimized_text, "filler word");
    }

    #[test]
    fn merge_missing_optimized_cue_keeps_original() {
        let original = vec![cue(1, 0.0, 1.0, "kept line")];
        let optimized = vec![]; // optimizer dropped this cue entirely
        let lines = merge_step1_lines(&original, &optimized);
        assert!(!lines[0].ai_suggest_remove);
        assert_eq!(lines[0].optimized_text, "kept line");
    }

    #[test]
    fn merge_matches_by_index_not_position() {
        // optimized cue 2 appears first in the array but must still match
        // original line_id 2, not original[0].
        let original = vec![cue(1, 0.0, 1.0, "first"), cue(2, 1.0, 2.0, "second")];
        let optimized = vec![cue(2, 1.0, 2.0, "<<REMOVE>> second"), cue(1, 0.0, 1.0, "first")];
        let lines = merge_step1_lines(&original, &optimized);
        assert_eq!(lines[0].line_id, 1);
        assert!(!lines[0].ai_suggest_remove);
        assert_eq!(lines[1].line_id, 2);
        assert!(lines[1].ai_suggest_remove);
    }

    #[test]
    fn render_final_srt_prefixes_removed_lines() {
        let lines = vec![Step1Line {
            line_id: 1,
            start_sec: 0.0,
            end_sec: 1.0,
            original_text: "cut me".into(),
            optimized_text: "cut me".into(),
            ai_suggest_remove: true,
            user_final_remove: true,
        }];
        let srt = render_final_step1_srt(&lines);
        assert!(srt.contains(REMOVE_TOKEN));
        assert!(srt.contains("cut me"));
    }

    #[test]
    fn render_final_srt_drops_zero_length_cues() {
        let lines = vec![Step1Line {
            line_id: 1,
            start_sec: 1.0,
            end_sec: 1.0,
            original_text: "bad".into(),
            optimized_text: "bad".into(),
            ai_suggest_remove: false,
            user_final_remove: false,
        }];
        let srt = render_final_step1_srt(&lines);
        assert!(srt.trim().is_empty());
    }
}
