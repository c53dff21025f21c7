use crate::{
    config::Config,
    error::{artifact_error, AppError, ServeError, ServeResult},
    evaluation::{self, ClassificationReport},
    features::{FeatureEncoder, FieldDictionary, Record},
    models::{ModelRegistry, PredictiveModel},
    scaler::FeatureScaler,
    types::{HoldoutFile, ModelSummary},
};
use nalgebra::{DMatrix, DVector};
use serde::de::DeserializeOwned;
use std::{path::Path, sync::Arc};
use tracing::{info, warn};

/// Labelled, already encoded records used for the stats endpoints.
#[derive(Debug, Clone)]
pub struct Holdout {
    features: DMatrix<f64>,
    labels: Vec<f64>,
}

impl Holdout {
    pub fn new(features: DMatrix<f64>, labels: Vec<f64>) -> ServeResult<Self> {
        if features.nrows() != labels.len() {
            return Err(ServeError::LengthMismatch {
                predictions: features.nrows(),
                labels: labels.len(),
            });
        }
        Ok(Self { features, labels })
    }

    pub fn features(&self) -> &DMatrix<f64> {
        &self.features
    }

    pub fn labels(&self) -> &[f64] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Fitted encoder, scaler and models. Built once before any request is
/// dispatched and then shared read-only behind an `Arc`.
pub struct ServingEngine {
    encoder: FeatureEncoder,
    scaler: FeatureScaler,
    models: ModelRegistry,
    holdout: Option<Holdout>,
}

impl ServingEngine {
    pub fn new(encoder: FeatureEncoder, scaler: FeatureScaler, models: ModelRegistry) -> Self {
        Self {
            encoder,
            scaler,
            models,
            holdout: None,
        }
    }

    pub fn with_holdout(mut self, holdout: Holdout) -> Self {
        self.holdout = Some(holdout);
        self
    }

    /// Read every artifact named in `config`.
    pub fn load(config: &Config) -> Result<Self, AppError> {
        info!("Loading serving artifacts...");

        let dictionary: FieldDictionary = read_json(&config.dictionary_path)?;
        info!(
            "Loaded field dictionary with {} dimensions from {}",
            dictionary.dimension_count(),
            config.dictionary_path.display()
        );
        let encoder = FeatureEncoder::from_dictionary(Arc::new(dictionary));

        let scaler: FeatureScaler = read_json(&config.scaler_path)?;
        for warning in scaler.degenerate_dimensions() {
            let field = encoder
                .dimension_order()
                .get(warning.dimension)
                .map_or("?", String::as_str);
            warn!(
                "Degenerate scale on dimension {} ({}): min == max == {}, values scale to 0",
                warning.dimension, field, warning.value
            );
        }

        let models = ModelRegistry::load_dir(&config.models_dir)?;
        if models.is_empty() {
            warn!("No models found in {}", config.models_dir.display());
        }
        for (id, model) in models.iter() {
            if model.input_dim() != encoder.dimension_count() {
                warn!(
                    "Model '{}' expects {} inputs but the encoder produces {}",
                    id,
                    model.input_dim(),
                    encoder.dimension_count()
                );
            }
        }

        let mut engine = Self::new(encoder, scaler, models);

        match &config.holdout_path {
            Some(path) if path.exists() => {
                let file: HoldoutFile = read_json(path)?;
                let features = engine.encoder.encode_batch(&file.records)?;
                let holdout = Holdout::new(features, file.labels)?;
                info!("Loaded holdout set with {} rows from {}", holdout.len(), path.display());
                engine = engine.with_holdout(holdout);
            }
            Some(path) => info!("No holdout set at {}, stats endpoints disabled", path.display()),
            None => info!("No holdout set configured, stats endpoints disabled"),
        }

        info!("Serving engine ready with {} models", engine.models.len());
        Ok(engine)
    }

    pub fn encode(&self, record: &Record) -> ServeResult<DVector<f64>> {
        self.encoder.encode(record)
    }

    /// Score one encoded vector, scaling it first when the model needs it.
    pub fn predict(&self, model_id: &str, features: &DVector<f64>) -> ServeResult<f64> {
        let model = self.models.get(model_id)?;
        if model.requires_scaling() {
            model.predict(&self.scaler.transform(features)?)
        } else {
            model.predict(features)
        }
    }

    pub fn predict_batch(&self, model_id: &str, features: &DMatrix<f64>) -> ServeResult<DVector<f64>> {
        let model = self.models.get(model_id)?;
        if model.requires_scaling() {
            model.predict_batch(&self.scaler.transform_matrix(features)?)
        } else {
            model.predict_batch(features)
        }
    }

    pub fn predict_record(&self, model_id: &str, record: &Record) -> ServeResult<f64> {
        self.models.get(model_id)?;
        let features = self.encode(record)?;
        self.predict(model_id, &features)
    }

    pub fn predict_records(&self, model_id: &str, records: &[Record]) -> ServeResult<Vec<f64>> {
        self.models.get(model_id)?;
        let features = self.encoder.encode_batch(records)?;
        Ok(self.predict_batch(model_id, &features)?.iter().copied().collect())
    }

    pub fn evaluate(
        &self,
        model_id: &str,
        features: &DMatrix<f64>,
        ground_truth: &[f64],
    ) -> ServeResult<ClassificationReport> {
        self.models.get(model_id)?;
        if features.nrows() != ground_truth.len() {
            return Err(ServeError::LengthMismatch {
                predictions: features.nrows(),
                labels: ground_truth.len(),
            });
        }
        let predictions = self.predict_batch(model_id, features)?;
        evaluation::evaluate(predictions.as_slice(), ground_truth)
    }

    pub fn evaluate_records(
        &self,
        model_id: &str,
        records: &[Record],
        ground_truth: &[f64],
    ) -> ServeResult<ClassificationReport> {
        self.models.get(model_id)?;
        let features = self.encoder.encode_batch(records)?;
        self.evaluate(model_id, &features, ground_truth)
    }

    /// Report for a model on the loaded holdout set; `None` when no holdout
    /// set was loaded. Unknown models fail first either way.
    pub fn holdout_report(&self, model_id: &str) -> ServeResult<Option<ClassificationReport>> {
        self.models.get(model_id)?;
        self.holdout
            .as_ref()
            .map(|holdout| self.evaluate(model_id, holdout.features(), holdout.labels()))
            .transpose()
    }

    pub fn holdout(&self) -> Option<&Holdout> {
        self.holdout.as_ref()
    }

    pub fn model_summaries(&self) -> Vec<ModelSummary> {
        self.models
            .iter()
            .map(|(id, model)| ModelSummary {
                id: id.to_string(),
                kind: model.kind(),
                input_dim: model.input_dim(),
                scaled_input: model.requires_scaling(),
            })
            .collect()
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn encoder(&self) -> &FeatureEncoder {
        &self.encoder
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| artifact_error(path, e))?;
    serde_json::from_str(&content).map_err(|e| artifact_error(path, e))
}
