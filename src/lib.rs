//! Live webcam person segmentation with a masked-background overlay.

pub mod capture;
pub mod output;
pub mod render;
pub mod schedule;
pub mod segmentation;
pub mod webcam;
