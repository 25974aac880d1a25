//! ONNX inpainting model handle.
//!
//! The session is created at most once per handle and reused for every
//! request. ONNX Runtime sessions need exclusive access to run, so calls are
//! serialized through a mutex; independent handles can run in parallel.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use ndarray::{Array4, ArrayD};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::error::{Error, Result};
use crate::inpaint::InpaintBackend;

/// Default location of the inpainting model.
pub const DEFAULT_MODEL_PATH: &str = "models/lama.onnx";

/// Native square resolution of LaMa-style models.
pub const DEFAULT_RESOLUTION: u32 = 512;

/// Model location and runtime settings.
#[derive(Debug, Clone)]
pub struct InpaintConfig {
    /// Path to the ONNX graph.
    pub model_path: PathBuf,
    /// Square input resolution the graph expects.
    pub resolution: u32,
    /// Intra-op threads; 0 lets the runtime decide.
    pub intra_threads: usize,
}

impl Default for InpaintConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            resolution: DEFAULT_RESOLUTION,
            intra_threads: 0,
        }
    }
}

/// A live session plus the tensor names it uses.
struct LoadedModel {
    session: Session,
    image_input: String,
    mask_input: String,
    output: String,
}

/// Lazily loaded ONNX inpainting model.
pub struct OnnxInpaintModel {
    path: PathBuf,
    resolution: u32,
    intra_threads: usize,
    loaded: Mutex<Option<LoadedModel>>,
}

impl std::fmt::Debug for OnnxInpaintModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxInpaintModel")
            .field("path", &self.path)
            .field("resolution", &self.resolution)
            .field("intra_threads", &self.intra_threads)
            .finish_non_exhaustive()
    }
}

impl OnnxInpaintModel {
    /// Check the configuration without creating a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for a zero resolution and
    /// [`Error::ModelNotFound`] if the model file does not exist.
    pub fn open(config: &InpaintConfig) -> Result<Self> {
        if config.resolution == 0 {
            return Err(Error::InvalidParameter {
                name: "resolution",
                reason: "must be positive".to_string(),
            });
        }
        if !config.model_path.is_file() {
            return Err(Error::ModelNotFound {
                path: config.model_path.clone(),
            });
        }
        Ok(Self {
            path: config.model_path.clone(),
            resolution: config.resolution,
            intra_threads: config.intra_threads,
            loaded: Mutex::new(None),
        })
    }

    /// Open and create the session immediately.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`open`](Self::open), and [`Error::ModelLoad`]
    /// if the runtime rejects the file.
    pub fn load(config: &InpaintConfig) -> Result<Self> {
        let model = Self::open(config)?;
        model.with_session(|_| Ok(()))?;
        Ok(model)
    }

    /// Model file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn build(&self) -> Result<LoadedModel> {
        let mut builder = Session::builder()
            .map_err(|e| load_error(&self.path, &e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(&self.path, &e))?;
        if self.intra_threads > 0 {
            builder = builder
                .with_intra_threads(self.intra_threads)
                .map_err(|e| load_error(&self.path, &e))?;
        }
        let session = builder
            .commit_from_file(&self.path)
            .map_err(|e| load_error(&self.path, &e))?;

        let inputs: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| Error::ModelLoad {
                path: self.path.clone(),
                reason: "graph has no outputs".to_string(),
            })?;
        let [first, second, ..] = inputs.as_slice() else {
            return Err(Error::ModelLoad {
                path: self.path.clone(),
                reason: format!("expected image and mask inputs, found {inputs:?}"),
            });
        };
        // Prefer names; fall back to the conventional (image, mask) order.
        let (image_input, mask_input) = if first.to_lowercase().contains("mask") {
            (second.clone(), first.clone())
        } else {
            (first.clone(), second.clone())
        };

        info!(
            path = %self.path.display(),
            image = %image_input,
            mask = %mask_input,
            output = %output,
            "inpainting model loaded"
        );
        Ok(LoadedModel {
            session,
            image_input,
            mask_input,
            output,
        })
    }

    /// Run `f` with exclusive access to the session, creating it on first use.
    fn with_session<T>(&self, f: impl FnOnce(&mut LoadedModel) -> Result<T>) -> Result<T> {
        let mut slot = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        let mut model = match slot.take() {
            Some(model) => model,
            None => self.build()?,
        };
        let result = f(&mut model);
        *slot = Some(model);
        result
    }
}

fn load_error(path: &Path, e: &impl std::fmt::Display) -> Error {
    Error::ModelLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    }
}

impl InpaintBackend for OnnxInpaintModel {
    fn resolution(&self) -> u32 {
        self.resolution
    }

    fn infer(&self, image: Array4<f32>, mask: Array4<f32>) -> Result<ArrayD<f32>> {
        let inference = |e: ort::Error| Error::Inference(e.to_string());
        let image = Tensor::from_array(image).map_err(inference)?;
        let mask = Tensor::from_array(mask).map_err(inference)?;

        self.with_session(|model| {
            let LoadedModel {
                session,
                image_input,
                mask_input,
                output,
            } = model;
            let outputs = session
                .run(ort::inputs![
                    image_input.as_str() => image,
                    mask_input.as_str() => mask,
                ])
                .map_err(inference)?;
            let prediction = outputs[output.as_str()]
                .try_extract_array::<f32>()
                .map_err(inference)?;
            Ok(prediction.to_owned())
        })
    }
}
