mod onnx;
mod preprocess;
mod session;
pub mod types;

pub use onnx::{ModelConfig, OnnxModelLoader, OnnxPersonSegmenter};
pub use preprocess::{Normalization, Preprocessor};
pub use session::{ModelHandle, ModelSession, ModelStatus, OverlapPolicy};
pub use types::{ModelLoader, SegmentationMap, SegmentationModel, DEFAULT_PERSON_THRESHOLD};
