//! Event detection: geometry, hit counting and frame annotation.
//!
//! ## Contents
//! - [`BBox`], [`Detection`] inference output
//! - [`HitAlgorithm`] counter + evidence ring buffer; emits [`Evidence`] once per burst
//! - [`overlay_boxes`] draws kept detections onto buffered frames

mod annotate;
mod geometry;
mod hits;

pub use annotate::overlay_boxes;
pub use geometry::{BBox, Detection};
pub use hits::{
    BufferedFrame, Evidence, EvidenceBuffer, HitAlgorithm, HitCounter, HitParams, Partition,
};
