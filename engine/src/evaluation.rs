//! Classification report for thresholded regression output.
//!
//! Scores are rounded half away from zero into class labels. The classes
//! reported are exactly the distinct rounded ground-truth values, in ascending
//! order. Ratios whose denominator is zero are reported as `NaN`, never as 0;
//! the JSON form writes them as `null` and the text form as `nan`.

use crate::error::{ServeError, ServeResult};
use serde::{Serialize, Serializer};
use std::fmt;

pub const REPORT_HEADERS: [&str; 4] = ["precision", "recall", "f1-score", "support"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub class: f64,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    #[serde(serialize_with = "undefined_as_null")]
    pub precision: f64,
    #[serde(serialize_with = "undefined_as_null")]
    pub recall: f64,
    #[serde(serialize_with = "undefined_as_null")]
    pub f1: f64,
    /// Ground-truth rows belonging to this class.
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    pub headers: [&'static str; 4],
    pub rows: Vec<ClassMetrics>,
    #[serde(serialize_with = "undefined_as_null")]
    pub accuracy: f64,
    pub samples: usize,
}

fn undefined_as_null<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_finite() {
        serializer.serialize_f64(*value)
    } else {
        serializer.serialize_none()
    }
}

pub fn precision(true_positives: usize, false_positives: usize) -> f64 {
    true_positives as f64 / (true_positives + false_positives) as f64
}

pub fn recall(true_positives: usize, false_negatives: usize) -> f64 {
    true_positives as f64 / (true_positives + false_negatives) as f64
}

pub fn f1_score(precision: f64, recall: f64) -> f64 {
    2.0 * precision * recall / (precision + recall)
}

/// Threshold `predictions` and score them against `ground_truth`.
pub fn evaluate(predictions: &[f64], ground_truth: &[f64]) -> ServeResult<ClassificationReport> {
    if predictions.len() != ground_truth.len() {
        return Err(ServeError::LengthMismatch {
            predictions: predictions.len(),
            labels: ground_truth.len(),
        });
    }
    if ground_truth.is_empty() {
        return Err(ServeError::EmptyInput("nothing to evaluate".to_string()));
    }
    if let Some((row, &value)) = ground_truth.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(ServeError::InvalidLabel { row, value });
    }

    // `+ 0.0` folds -0.0 into 0.0 so both land in the same class.
    let predicted: Vec<f64> = predictions.iter().map(|p| p.round() + 0.0).collect();
    let truth: Vec<f64> = ground_truth.iter().map(|t| t.round() + 0.0).collect();

    let mut classes = truth.clone();
    classes.sort_by(f64::total_cmp);
    classes.dedup();

    let rows = classes
        .into_iter()
        .map(|class| class_metrics(class, &predicted, &truth))
        .collect();

    let correct = predicted.iter().zip(&truth).filter(|(p, t)| p == t).count();

    Ok(ClassificationReport {
        headers: REPORT_HEADERS,
        rows,
        accuracy: correct as f64 / truth.len() as f64,
        samples: truth.len(),
    })
}

fn class_metrics(class: f64, predicted: &[f64], truth: &[f64]) -> ClassMetrics {
    let mut true_positives = 0;
    let mut false_positives = 0;
    let mut false_negatives = 0;
    let mut support = 0;

    for (&p, &t) in predicted.iter().zip(truth) {
        if t == class {
            support += 1;
        }
        if p == t {
            if p == class {
                true_positives += 1;
            }
        } else if p == class {
            false_positives += 1;
        } else {
            false_negatives += 1;
        }
    }

    let precision = precision(true_positives, false_positives);
    let recall = recall(true_positives, false_negatives);

    ClassMetrics {
        class,
        true_positives,
        false_positives,
        false_negatives,
        precision,
        recall,
        f1: f1_score(precision, recall),
        support,
    }
}

impl ClassificationReport {
    pub fn row(&self, class: f64) -> Option<&ClassMetrics> {
        self.rows.iter().find(|r| r.class == class)
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for header in self.headers {
            write!(f, "{header:>12}")?;
        }
        writeln!(f)?;
        writeln!(f)?;

        for row in &self.rows {
            writeln!(
                f,
                "{:>8}{:>12}{:>12}{:>12}{:>12}",
                row.class,
                metric(row.precision),
                metric(row.recall),
                metric(row.f1),
                row.support
            )?;
        }

        writeln!(f)?;
        writeln!(f, "{:>8}{:>36}{:>12}", "accuracy", metric(self.accuracy), self.samples)
    }
}

fn metric(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else {
        format!("{value:.2}")
    }
}
