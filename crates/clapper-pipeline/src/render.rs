//! Algorithm C — render config synthesis.
//!
//! Builds the JSON document the client-side renderer consumes. The
//! cut-srt/timeline builder itself is an external collaborator (§6.2,
//! `build_cut_srt`); this module only assembles captions/segments/topics
//! and computes frame-count/dimension invariants once that timeline exists.

use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::model::Step2Chapter;

#[derive(Debug, Clone)]
pub struct Segment {
    pub start_sec: f64,
    pub end_sec: f64,
}

#[derive(Debug, Clone)]
pub struct Caption {
    pub index: i64,
    pub start_sec: f64,
    pub end_sec: f64,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct RenderCaption {
    pub index: i64,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct RenderSegment {
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Serialize)]
pub struct RenderTopic {
    pub title: String,
    pub summary: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Serialize)]
pub struct RenderConfig {
    pub captions: Vec<RenderCaption>,
    pub segments: Vec<RenderSegment>,
    pub topics: Vec<RenderTopic>,
    pub duration_in_frames: u64,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Validate client-supplied output dimensions/fps (§4.9 Algorithm C:
/// "Enforce even, positive width/height; fps ∈ [1, 120]").
pub fn validate_dimensions(width: u32, height: u32, fps: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(PipelineError::InvalidRenderConfig(
            "width and height must be positive".into(),
        ));
    }
    if width % 2 != 0 || height % 2 != 0 {
        return Err(PipelineError::InvalidRenderConfig(
            "width and height must be even".into(),
        ));
    }
    if !(1..=120).contains(&fps) {
        return Err(PipelineError::InvalidRenderConfig(
            "fps must be between 1 and 120".into(),
        ));
    }
    Ok(())
}

/// `durationInFrames = Σ ceil((seg.end − seg.start) · fps)` clamped ≥ 1.
pub fn duration_in_frames(segments: &[Segment], fps: u32) -> u64 {
    let total: u64 = segments
        .iter()
        .map(|seg| {
            let span = (seg.end_sec - seg.start_sec).max(0.0);
            (span * fps as f64).ceil() as u64
        })
        .sum();
    total.max(1)
}

pub fn build_render_config(
    captions: &[Caption],
    segments: &[Segment],
    chapters: &[Step2Chapter],
    width: u32,
    height: u32,
    fps: u32,
) -> Result<RenderConfig> {
    validate_dimensions(width, height, fps)?;

    let render_captions = captions
        .iter()
        .map(|c| RenderCaption {
            index: c.index,
            start: c.start_sec,
            end: c.end_sec,
            text: c.text.clone(),
        })
        .collect();

    let render_segments = segments
        .iter()
        .map(|s| RenderSegment {
            start: s.start_sec,
            end: s.end_sec,
        })
        .collect();

    let render_topics = chapters
        .iter()
        .map(|c| RenderTopic {
            title: c.title.clone(),
            summary: c.summary.clone(),
            start: c.start_sec,
            end: c.end_sec,
        })
        .collect();

    Ok(RenderConfig {
        captions: render_captions,
        segments: render_segments,
        topics: render_topics,
        duration_in_frames: duration_in_frames(segments, fps),
        width,
        height,
        fps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_odd_dimensions() {
        assert!(validate_dimensions(1921, 1080, 30).is_err());
    }

    #[test]
    fn rejects_out_of_range_fps() {
        assert!(validate_dimensions(1920, 1080, 0).is_err());
        assert!(validate_dimensions(1920, 1080, 121).is_err());
    }

    #[test]
    fn accepts_boundary_fps() {
        assert!(validate_dimensions(1920, 1080, 1).is_ok());
        assert!(validate_dimensions(1920, 1080, 120).is_ok());
    }

    #[test]
    fn duration_in_frames_sums_and_ceils_per_segment() {
        let segments = vec![
            Segment { start_sec: 0.0, end_sec: 1.0 },
            Segment { start_sec: 1.0, end_sec: 1.5 },
        ];
        // 1.0*30=30, 0.5*30=15 -> 45
        assert_eq!(duration_in_frames(&segments, 30), 45);
    }

    #[test]
    fn duration_in_frames_clamped_to_at_least_one() {
        assert_eq!(duration_in_frames(&[], 30), 1);
    }
}
