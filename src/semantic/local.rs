//! In-process embedding provider backed by fastembed.
//!
//! Model names are resolved against fastembed's registry by the last path
//! segment of the model code, so "bge-base-en-v1.5" finds "Xenova/bge-base-en-v1.5".
//! Weights are downloaded into `models/` under the base directory on first use.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::semantic::provider::{EmbeddingProvider, ProviderError};

pub struct LocalProvider {
    // embed() takes &mut self
    model: Mutex<TextEmbedding>,
    model_name: String,
}

/// Registry entry for `name` and its vector width.
fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize), ProviderError> {
    let wanted = name.trim().to_lowercase();
    let supported = TextEmbedding::list_supported_models();

    supported
        .iter()
        .find(|info| {
            let code = info.model_code.to_lowercase();
            let short = code.rsplit('/').next().unwrap_or_default();
            code == wanted || short == wanted || short.trim_end_matches("-onnx") == wanted
        })
        .map(|info| (info.model.clone(), info.dim))
        .ok_or_else(|| {
            let known: Vec<&str> = supported
                .iter()
                .filter_map(|info| info.model_code.rsplit('/').next())
                .collect();
            ProviderError::Model(format!(
                "unknown local model {name:?}, expected one of: {}",
                known.join(", ")
            ))
        })
}

impl LocalProvider {
    pub fn new(model_name: &str, base_dir: PathBuf) -> Result<Self, ProviderError> {
        let (model, dimensions) = resolve_model(model_name)?;

        let models_dir = base_dir.join("models");
        std::fs::create_dir_all(&models_dir)
            .map_err(|e| ProviderError::Model(format!("cannot create {}: {e}", models_dir.display())))?;

        let options = InitOptions::new(model)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);
        let model = TextEmbedding::try_new(options).map_err(|e| ProviderError::Model(e.to_string()))?;

        log::info!("Loaded local model {model_name} ({dimensions} dimensions)");

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
        })
    }
}

impl EmbeddingProvider for LocalProvider {
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self
            .model
            .lock()
            .map_err(|_| ProviderError::Model("local model lock poisoned".to_string()))?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| ProviderError::Model(e.to_string()))
    }

    fn kind(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        &self.model_name
    }
}
