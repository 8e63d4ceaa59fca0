//! Per-frame pipeline: rotate, convert to luminance, find faces, find noses
//! inside each face, and mark every nose with a filled circle.

use crate::classifier::ClassifierSlot;
use crate::frame::{self, Frame, GrayFrame, Rgba, Rotation};
use crate::types::{DetectParams, Marker, Rect};
use serde::Serialize;
use std::sync::Arc;

pub const DEFAULT_MARKER_COLOR: Rgba = [255, 0, 0, 255];
pub const DEFAULT_OUTLINE_COLOR: Rgba = [255, 255, 0, 255];
pub const DEFAULT_OUTLINE_THICKNESS: u32 = 5;

/// Optional rectangle drawn around each detected face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceOutline {
    pub color: Rgba,
    pub thickness: u32,
}

impl Default for FaceOutline {
    fn default() -> Self {
        Self {
            color: DEFAULT_OUTLINE_COLOR,
            thickness: DEFAULT_OUTLINE_THICKNESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatorSettings {
    pub rotation: Rotation,
    pub face: DetectParams,
    pub nose: DetectParams,
    pub marker_color: Rgba,
    pub face_outline: Option<FaceOutline>,
}

impl Default for AnnotatorSettings {
    fn default() -> Self {
        Self {
            rotation: Rotation::default(),
            face: DetectParams::face_default(),
            nose: DetectParams::nose_default(),
            marker_color: DEFAULT_MARKER_COLOR,
            face_outline: None,
        }
    }
}

/// What one frame produced, in rotated-frame coordinates.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
    /// Face regions as reported by the face classifier.
    pub faces: Vec<Rect>,
    /// One marker per nose, after translation out of its face region.
    pub markers: Vec<Marker>,
}

/// An annotated frame with its report.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub report: FrameReport,
}

/// Runs the detection-and-annotation pipeline one frame at a time.
///
/// Holds a luminance scratch buffer that is reused across frames of the same
/// size; it is fully rewritten before every read.
pub struct FrameAnnotator {
    face: Arc<ClassifierSlot>,
    nose: Arc<ClassifierSlot>,
    settings: AnnotatorSettings,
    gray: GrayFrame,
}

impl FrameAnnotator {
    pub fn new(
        face: Arc<ClassifierSlot>,
        nose: Arc<ClassifierSlot>,
        settings: AnnotatorSettings,
    ) -> Self {
        Self {
            face,
            nose,
            settings,
            gray: GrayFrame::default(),
        }
    }

    /// Annotate `input` into a newly allocated frame.
    pub fn annotate(&mut self, input: &Frame) -> AnnotatedFrame {
        let mut frame = Frame::default();
        let report = self.annotate_into(input, &mut frame);
        AnnotatedFrame { frame, report }
    }

    /// Annotate `input` into `output`, reusing its allocation.
    pub fn annotate_into(&mut self, input: &Frame, output: &mut Frame) -> FrameReport {
        frame::rotate_into(input, output, self.settings.rotation);
        frame::grayscale_into(output, &mut self.gray);

        let mut report = FrameReport::default();

        let Some(face_classifier) = self.face.get() else {
            tracing::debug!(slot = self.face.name(), "face classifier not ready; skipping detection");
            return report;
        };
        report.faces = face_classifier.detect(self.gray.view(), &self.settings.face);

        let nose_classifier = self.nose.get();
        if nose_classifier.is_none() && !report.faces.is_empty() {
            tracing::debug!(slot = self.nose.name(), "nose classifier not ready; skipping detection");
        }

        // Outlines first so markers stay on top where faces overlap.
        if let Some(outline) = &self.settings.face_outline {
            for face in &report.faces {
                frame::draw_rect_outline(output, face, outline.thickness, outline.color);
            }
        }

        for face in &report.faces {
            let Some((region, face_view)) = self.gray.sub_view(face) else {
                tracing::debug!(?face, "face region outside frame; skipping");
                continue;
            };
            if region != *face {
                tracing::debug!(?face, ?region, "face region clamped to frame");
            }

            let Some(nose_classifier) = nose_classifier else {
                continue;
            };

            for nose in nose_classifier.detect(face_view, &self.settings.nose) {
                let marker = Marker::for_region(&nose.translate(region.x, region.y));
                frame::fill_circle(output, marker.center, marker.radius, self.settings.marker_color);
                report.markers.push(marker);
            }
        }

        tracing::debug!(
            width = output.width(),
            height = output.height(),
            faces = report.faces.len(),
            markers = report.markers.len(),
            "frame annotated"
        );
        report
    }
}
