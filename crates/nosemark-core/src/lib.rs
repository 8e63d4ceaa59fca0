//! nosemark-core: Nose marking on camera frames.
//!
//! Rotates each frame upright, finds faces with a Haar cascade, searches each
//! face for noses with a second cascade, and draws a filled circle over every
//! nose found.

pub mod annotator;
pub mod cascade;
pub mod classifier;
pub mod frame;
pub mod grouping;
mod integral;
pub mod loader;
pub mod types;

pub use annotator::{AnnotatedFrame, AnnotatorSettings, FaceOutline, FrameAnnotator, FrameReport};
pub use cascade::{CascadeError, CascadeSummary, HaarCascade};
pub use classifier::{Classifier, ClassifierSlot};
pub use frame::{Frame, FrameError, GrayFrame, GrayView, Rgba, Rotation};
pub use loader::{load_into, spawn_loader, LoadJob, LoadOutcome};
pub use types::{DetectParams, Marker, Point, Rect, Size};
