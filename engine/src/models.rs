use crate::error::{artifact_error, AppError, ServeError, ServeResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use tracing::{info, warn};

/// Prediction capability shared by every model kind.
pub trait PredictiveModel: Send + Sync {
    /// Number of features the model was trained on.
    fn input_dim(&self) -> usize;

    /// Continuous score for a single encoded record.
    fn predict(&self, features: &DVector<f64>) -> ServeResult<f64>;

    /// Scores for a batch, one per matrix row.
    fn predict_batch(&self, features: &DMatrix<f64>) -> ServeResult<DVector<f64>> {
        check_dim(self.input_dim(), features.ncols())?;
        let scores = features
            .row_iter()
            .map(|row| self.predict(&row.transpose()))
            .collect::<ServeResult<Vec<_>>>()?;
        Ok(DVector::from_vec(scores))
    }

    /// Whether inputs must pass through the fitted scaler first.
    fn requires_scaling(&self) -> bool {
        false
    }
}

fn check_dim(expected: usize, actual: usize) -> ServeResult<()> {
    if expected != actual {
        return Err(ServeError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Linear,
    Tree,
    Network,
}

/// Least-squares regressor: `parameters[0]` is the intercept, the rest are
/// per-feature weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    parameters: Vec<f64>,
}

impl LinearModel {
    pub fn new(parameters: Vec<f64>) -> ServeResult<Self> {
        if parameters.is_empty() {
            return Err(ServeError::InvalidModel {
                model: "linear".to_string(),
                reason: "missing intercept".to_string(),
            });
        }
        Ok(Self { parameters })
    }

    pub fn intercept(&self) -> f64 {
        self.parameters[0]
    }
}

impl PredictiveModel for LinearModel {
    fn input_dim(&self) -> usize {
        self.parameters.len().saturating_sub(1)
    }

    fn predict(&self, features: &DVector<f64>) -> ServeResult<f64> {
        check_dim(self.input_dim(), features.len())?;
        let weights = &self.parameters[1..];
        Ok(self.intercept() + weights.iter().zip(features.iter()).map(|(w, x)| w * x).sum::<f64>())
    }

    fn predict_batch(&self, features: &DMatrix<f64>) -> ServeResult<DVector<f64>> {
        check_dim(self.input_dim(), features.ncols())?;
        let weights = DVector::from_column_slice(&self.parameters[1..]);
        Ok((features * weights).add_scalar(self.intercept()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum TreeNode {
    /// Go to `left` when `x[feature] <= threshold`, otherwise `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Decision tree stored as a flat node array with the root at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeModel {
    input_dim: usize,
    nodes: Vec<TreeNode>,
}

impl TreeModel {
    /// Children must point strictly forward in the array, which rules out
    /// cycles and guarantees every traversal ends at a leaf.
    pub fn new(input_dim: usize, nodes: Vec<TreeNode>) -> ServeResult<Self> {
        let invalid = |reason: String| ServeError::InvalidModel {
            model: "tree".to_string(),
            reason,
        };
        if nodes.is_empty() {
            return Err(invalid("tree has no nodes".to_string()));
        }
        for (i, node) in nodes.iter().enumerate() {
            if let TreeNode::Split { feature, left, right, .. } = *node {
                if feature >= input_dim {
                    return Err(invalid(format!("node {i} splits on feature {feature} of {input_dim}")));
                }
                for child in [left, right] {
                    if child <= i || child >= nodes.len() {
                        return Err(invalid(format!("node {i} has invalid child {child}")));
                    }
                }
            }
        }
        Ok(Self { input_dim, nodes })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn leaf_for(&self, features: &DVector<f64>) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split { feature, threshold, left, right } => {
                    index = if features[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

impl PredictiveModel for TreeModel {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn predict(&self, features: &DVector<f64>) -> ServeResult<f64> {
        check_dim(self.input_dim, features.len())?;
        Ok(self.leaf_for(features))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum Activation {
    Relu,
    /// `max(0, x) + alpha`
    FlexibleRelu { alpha: f64 },
    Sigmoid,
    Tanh,
    Identity,
}

impl Activation {
    #[inline]
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Relu => x.max(0.0),
            Activation::FlexibleRelu { alpha } => x.max(0.0) + alpha,
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
            Activation::Identity => x,
        }
    }
}

/// Serialized layer description; weights are row-major `outputs × inputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layer", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense { weights: Vec<Vec<f64>>, bias: Vec<f64> },
    Activation { activation: Activation },
}

#[derive(Debug, Clone, PartialEq)]
enum Layer {
    Dense { weights: DMatrix<f64>, bias: DVector<f64> },
    Activation(Activation),
}

/// Feed-forward network evaluated forward only. Trained on min-max scaled
/// inputs, so it always asks for scaling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "NetworkSpec", into = "NetworkSpec")]
pub struct NetworkModel {
    input_dim: usize,
    layers: Vec<Layer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub layers: Vec<LayerSpec>,
}

impl NetworkModel {
    pub fn new(layers: Vec<LayerSpec>) -> ServeResult<Self> {
        let invalid = |reason: String| ServeError::InvalidModel {
            model: "network".to_string(),
            reason,
        };

        let mut input_dim = None;
        let mut width = None;
        let mut built = Vec::with_capacity(layers.len());
        for (i, spec) in layers.into_iter().enumerate() {
            match spec {
                LayerSpec::Dense { weights, bias } => {
                    let outputs = weights.len();
                    let inputs = weights.first().map_or(0, Vec::len);
                    if outputs == 0 || inputs == 0 {
                        return Err(invalid(format!("layer {i} has empty weights")));
                    }
                    if weights.iter().any(|row| row.len() != inputs) {
                        return Err(invalid(format!("layer {i} has ragged weight rows")));
                    }
                    if bias.len() != outputs {
                        return Err(invalid(format!(
                            "layer {i} bias has {} entries for {outputs} outputs",
                            bias.len()
                        )));
                    }
                    if let Some(previous) = width {
                        if previous != inputs {
                            return Err(invalid(format!(
                                "layer {i} expects {inputs} inputs but receives {previous}"
                            )));
                        }
                    }
                    input_dim.get_or_insert(inputs);
                    width = Some(outputs);
                    built.push(Layer::Dense {
                        weights: DMatrix::from_row_iterator(outputs, inputs, weights.into_iter().flatten()),
                        bias: DVector::from_vec(bias),
                    });
                }
                LayerSpec::Activation { activation } => built.push(Layer::Activation(activation)),
            }
        }

        match (input_dim, width) {
            (Some(input_dim), Some(1)) => Ok(Self {
                input_dim,
                layers: built,
            }),
            (None, _) => Err(invalid("network has no dense layers".to_string())),
            (_, Some(outputs)) => Err(invalid(format!("network emits {outputs} outputs, expected 1"))),
            _ => unreachable!("width is set whenever input_dim is"),
        }
    }

    fn forward(&self, features: &DVector<f64>) -> DVector<f64> {
        let mut activation = features.clone();
        for layer in &self.layers {
            match layer {
                Layer::Dense { weights, bias } => activation = weights * activation + bias,
                Layer::Activation(function) => activation.apply(|x| *x = function.apply(*x)),
            }
        }
        activation
    }
}

impl TryFrom<NetworkSpec> for NetworkModel {
    type Error = ServeError;

    fn try_from(spec: NetworkSpec) -> Result<Self, Self::Error> {
        Self::new(spec.layers)
    }
}

impl From<NetworkModel> for NetworkSpec {
    fn from(model: NetworkModel) -> Self {
        let layers = model
            .layers
            .into_iter()
            .map(|layer| match layer {
                Layer::Dense { weights, bias } => LayerSpec::Dense {
                    weights: weights
                        .row_iter()
                        .map(|row| row.iter().copied().collect())
                        .collect(),
                    bias: bias.iter().copied().collect(),
                },
                Layer::Activation(activation) => LayerSpec::Activation { activation },
            })
            .collect();
        NetworkSpec { layers }
    }
}

impl PredictiveModel for NetworkModel {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn predict(&self, features: &DVector<f64>) -> ServeResult<f64> {
        check_dim(self.input_dim, features.len())?;
        Ok(self.forward(features)[0])
    }

    fn requires_scaling(&self) -> bool {
        true
    }
}

/// Any loaded model, tagged by kind in its artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Model {
    Linear(LinearModel),
    Tree(TreeModel),
    Network(NetworkModel),
}

impl Model {
    pub fn kind(&self) -> ModelKind {
        match self {
            Model::Linear(_) => ModelKind::Linear,
            Model::Tree(_) => ModelKind::Tree,
            Model::Network(_) => ModelKind::Network,
        }
    }

    fn inner(&self) -> &dyn PredictiveModel {
        match self {
            Model::Linear(m) => m,
            Model::Tree(m) => m,
            Model::Network(m) => m,
        }
    }

    /// Re-run constructor checks that plain deserialization skips.
    fn validated(self, id: &str) -> ServeResult<Self> {
        let rename = |err: ServeError| match err {
            ServeError::InvalidModel { reason, .. } => ServeError::InvalidModel {
                model: id.to_string(),
                reason,
            },
            other => other,
        };
        match self {
            Model::Linear(m) => LinearModel::new(m.parameters).map(Model::Linear).map_err(rename),
            Model::Tree(m) => TreeModel::new(m.input_dim, m.nodes).map(Model::Tree).map_err(rename),
            network @ Model::Network(_) => Ok(network),
        }
    }
}

impl PredictiveModel for Model {
    fn input_dim(&self) -> usize {
        self.inner().input_dim()
    }

    fn predict(&self, features: &DVector<f64>) -> ServeResult<f64> {
        self.inner().predict(features)
    }

    fn predict_batch(&self, features: &DMatrix<f64>) -> ServeResult<DVector<f64>> {
        self.inner().predict_batch(features)
    }

    fn requires_scaling(&self) -> bool {
        self.inner().requires_scaling()
    }
}

/// Loaded models keyed by identifier (`linear`, `tree`, `nn`, …).
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, Model>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, model: Model) -> Option<Model> {
        self.models.insert(id.into(), model)
    }

    pub fn get(&self, id: &str) -> Result<&Model, ServeError> {
        self.models
            .get(id)
            .ok_or_else(|| ServeError::UnknownModel(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Model)> {
        self.models.iter().map(|(id, model)| (id.as_str(), model))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Load every `*.json` file in `dir`; the file stem becomes the model id.
    pub fn load_dir(dir: &Path) -> Result<Self, AppError> {
        let mut registry = Self::new();
        let mut paths = std::fs::read_dir(dir)
            .and_then(|entries| {
                entries
                    .map(|entry| entry.map(|e| e.path()))
                    .collect::<Result<Vec<_>, _>>()
            })
            .map_err(|e| artifact_error(dir, e))?;
        paths.sort();

        for path in paths {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                warn!("Skipping model file with non UTF-8 name: {}", path.display());
                continue;
            };

            let content = std::fs::read_to_string(&path).map_err(|e| artifact_error(&path, e))?;
            let model: Model = serde_json::from_str(&content).map_err(|e| artifact_error(&path, e))?;
            let model = model.validated(&id)?;
            info!(
                "Loaded {:?} model '{}' from {} ({} inputs)",
                model.kind(),
                id,
                path.display(),
                model.input_dim()
            );
            registry.insert(id, model);
        }

        Ok(registry)
    }
}
