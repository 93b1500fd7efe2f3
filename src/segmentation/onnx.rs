use super::preprocess::{Normalization, Preprocessor};
use super::types::{ModelLoader, SegmentationMap, SegmentationModel, DEFAULT_PERSON_THRESHOLD};
use anyhow::{bail, Context, Result};
use image::RgbImage;
use ndarray::{ArrayViewD, Axis};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::PathBuf;

/// Where and how to load a person-segmentation ONNX model
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub normalization: Normalization,
    pub threshold: f32,
    pub intra_threads: usize,
}

impl ModelConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            input_width: 256,
            input_height: 256,
            normalization: Normalization::default(),
            threshold: DEFAULT_PERSON_THRESHOLD,
            intra_threads: 4,
        }
    }
}

pub struct OnnxModelLoader {
    config: ModelConfig,
}

impl OnnxModelLoader {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Box<dyn SegmentationModel>> {
        Ok(Box::new(OnnxPersonSegmenter::new(self.config.clone())?))
    }
}

/// Person segmentation with a single-input ONNX graph
///
/// The first output is read as either a single person-probability channel
/// (`[1,1,H,W]`, `[1,H,W]` or `[1,H,W,1]`) or two-class logits
/// `[1,2,H,W]` where class 1 is person.
pub struct OnnxPersonSegmenter {
    session: Session,
    preprocessor: Preprocessor,
    config: ModelConfig,
}

impl OnnxPersonSegmenter {
    pub fn new(config: ModelConfig) -> Result<Self> {
        let path = config.path.as_path();

        tracing::info!("Loading segmentation model from {}", path.display());

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        tracing::info!(
            "Segmentation model ready ({}x{} input)",
            config.input_width,
            config.input_height
        );

        let preprocessor = Preprocessor::new(config.input_width, config.input_height, config.normalization);

        Ok(Self {
            session,
            preprocessor,
            config,
        })
    }
}

/// Flatten model output to a row-major person-probability map
fn person_probabilities(output: ArrayViewD<'_, f32>) -> Result<(Vec<f32>, u32, u32)> {
    let shape = output.shape().to_vec();
    let (height, width) = match shape.as_slice() {
        // Checked before channels-last so a two-row [1, 2, H, 1] logit map
        // is not read as a single-channel image
        [1, 2, h, w] => {
            let logits = output.index_axis(Axis(0), 0);
            let background = logits.index_axis(Axis(0), 0);
            let person = logits.index_axis(Axis(0), 1);
            let probabilities = person
                .iter()
                .zip(background.iter())
                .map(|(&p, &b)| 1.0 / (1.0 + (b - p).exp()))
                .collect();
            return Ok((probabilities, *w as u32, *h as u32));
        }
        [1, 1, h, w] | [1, h, w] | [1, h, w, 1] => (*h, *w),
        other => bail!("unsupported segmentation output shape {:?}", other),
    };

    Ok((output.iter().copied().collect(), width as u32, height as u32))
}

impl SegmentationModel for OnnxPersonSegmenter {
    fn segment(&mut self, frame: &RgbImage) -> Result<SegmentationMap> {
        let _span = tracing::debug_span!("onnx_segment").entered();

        let input = ort::value::Tensor::from_array(self.preprocessor.preprocess(frame))?;

        let _infer_span = tracing::debug_span!("inference").entered();
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("Failed to run inference")?;
        drop(_infer_span);

        let output = outputs[0].try_extract_array::<f32>()?;
        let (probabilities, map_width, map_height) = person_probabilities(output)?;

        let (frame_width, frame_height) = frame.dimensions();
        Preprocessor::postprocess(
            &probabilities,
            map_width,
            map_height,
            frame_width,
            frame_height,
            self.config.threshold,
        )
    }

    fn input_size(&self) -> (u32, u32) {
        (self.config.input_width, self.config.input_height)
    }
}
