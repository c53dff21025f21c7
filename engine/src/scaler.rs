use crate::error::{ServeError, ServeResult};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// A fitted dimension whose training minimum equals its maximum. Every value
/// in that dimension transforms to `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DegenerateScaleWarning {
    pub dimension: usize,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ScaleBounds {
    mins: Vec<f64>,
    maxs: Vec<f64>,
}

/// Min-max scaler into `[0, 1]` using statistics captured at fit time.
///
/// Rows are records and columns are dimensions. A deserialized scaler is
/// always fitted with matching `mins`/`maxs` tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScaleBounds")]
pub struct FeatureScaler {
    #[serde(flatten)]
    bounds: Option<ScaleBounds>,
}

impl FeatureScaler {
    /// An unfitted scaler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a scaler from previously fitted per-dimension bounds.
    pub fn from_bounds(mins: Vec<f64>, maxs: Vec<f64>) -> ServeResult<Self> {
        Ok(Self {
            bounds: Some(ScaleBounds::new(mins, maxs)?),
        })
    }

    pub fn fit(&mut self, training: &DMatrix<f64>) -> ServeResult<()> {
        if training.nrows() == 0 || training.ncols() == 0 {
            return Err(ServeError::EmptyInput("scaler needs a non-empty training matrix".to_string()));
        }

        let mins = training.column_iter().map(|c| c.min()).collect();
        let maxs = training.column_iter().map(|c| c.max()).collect();
        self.bounds = Some(ScaleBounds { mins, maxs });
        Ok(())
    }

    pub fn is_fitted(&self) -> bool {
        self.bounds.is_some()
    }

    /// Fitted `(mins, maxs)`.
    pub fn bounds(&self) -> ServeResult<(&[f64], &[f64])> {
        let bounds = self.fitted()?;
        Ok((&bounds.mins, &bounds.maxs))
    }

    pub fn dimension_count(&self) -> Option<usize> {
        self.bounds.as_ref().map(|b| b.mins.len())
    }

    pub fn transform(&self, features: &DVector<f64>) -> ServeResult<DVector<f64>> {
        let bounds = self.fitted()?;
        bounds.check_width(features.len())?;
        Ok(DVector::from_iterator(
            features.len(),
            features.iter().enumerate().map(|(i, &x)| bounds.scale(i, x)),
        ))
    }

    pub fn transform_matrix(&self, features: &DMatrix<f64>) -> ServeResult<DMatrix<f64>> {
        let bounds = self.fitted()?;
        bounds.check_width(features.ncols())?;

        let mut scaled = features.clone();
        for (i, mut column) in scaled.column_iter_mut().enumerate() {
            column.apply(|x| *x = bounds.scale(i, *x));
        }
        Ok(scaled)
    }

    /// Dimensions with zero fitted range.
    pub fn degenerate_dimensions(&self) -> Vec<DegenerateScaleWarning> {
        let Some(bounds) = &self.bounds else {
            return Vec::new();
        };
        bounds
            .mins
            .iter()
            .zip(&bounds.maxs)
            .enumerate()
            .filter(|(_, (min, max))| min == max)
            .map(|(dimension, (&value, _))| DegenerateScaleWarning { dimension, value })
            .collect()
    }

    fn fitted(&self) -> ServeResult<&ScaleBounds> {
        self.bounds.as_ref().ok_or(ServeError::NotFitted)
    }
}

impl TryFrom<ScaleBounds> for FeatureScaler {
    type Error = ServeError;

    fn try_from(bounds: ScaleBounds) -> ServeResult<Self> {
        Self::from_bounds(bounds.mins, bounds.maxs)
    }
}

impl ScaleBounds {
    fn new(mins: Vec<f64>, maxs: Vec<f64>) -> ServeResult<Self> {
        if mins.len() != maxs.len() {
            return Err(ServeError::DimensionMismatch {
                expected: mins.len(),
                actual: maxs.len(),
            });
        }
        if mins.is_empty() {
            return Err(ServeError::EmptyInput("scaler bounds hold no dimensions".to_string()));
        }
        Ok(Self { mins, maxs })
    }

    fn check_width(&self, actual: usize) -> ServeResult<()> {
        if actual != self.mins.len() {
            return Err(ServeError::DimensionMismatch {
                expected: self.mins.len(),
                actual,
            });
        }
        Ok(())
    }

    #[inline]
    fn scale(&self, dimension: usize, x: f64) -> f64 {
        let (min, max) = (self.mins[dimension], self.maxs[dimension]);
        let range = max - min;
        if range == 0.0 {
            0.0
        } else {
            (x - min) / range
        }
    }
}
