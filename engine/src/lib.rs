//! Inference serving core for the customer credit-risk models.
//!
//! A raw record flows through [`features::FeatureEncoder`], optionally through
//! [`scaler::FeatureScaler`], into a [`models::PredictiveModel`]. Batches with
//! ground truth can be scored with [`evaluation::evaluate`].

pub mod config;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod models;
pub mod routes;
pub mod scaler;
pub mod types;

#[cfg(test)]
mod testing;

pub use engine::ServingEngine;
pub use error::{AppError, ServeError, ServeResult};
