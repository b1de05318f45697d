//! Dynamic linear models for multivariate sensor series
//!
//! This library infers the latent state of noisy, gappy sensor series with a
//! linear-Gaussian state-space model and samples the noise covariances with a
//! Gibbs sampler.
//!
//! # Module Structure
//!
//! - `observations`: Observation matrix with explicit missing cells
//! - `models`: State space model, per-series structure and θ → model builder
//! - `filter`: Kalman filter tolerant of missing components
//! - `smoother`: RTS smoother
//! - `ffbs`: Forward-filtering backward-sampling of latent trajectories
//! - `variance`: Conjugate inverse-gamma / inverse-Wishart variance draws
//! - `gibbs`: Multi-chain Gibbs driver
//! - `summary`: Burn-in, credible intervals, R-hat
//! - `simulate`: Synthetic data from a model
//! - `dist`: Statistical distributions (inverse-gamma, inverse-Wishart, Normal)
//! - `linalg`: Factored covariance matrices

pub mod dist;
pub mod error;
pub mod ffbs;
pub mod filter;
pub mod gibbs;
pub mod linalg;
pub mod models;
pub mod observations;
pub mod simulate;
pub mod smoother;
pub mod summary;
pub mod variance;

// Re-export commonly used types and functions for external use
pub use crate::error::DlmError;
pub use crate::ffbs::{BackwardSampler, Trajectory};
pub use crate::filter::{FilterResult, FilterStep, KalmanFilter};
pub use crate::gibbs::{
    ChainFailure, ChainRecord, ChainRun, GibbsConfig, GibbsConfigBuilder, GibbsDriver, GibbsOutput,
};
pub use crate::models::StateSpaceModel;
pub use crate::models::builder::ModelBuilder;
pub use crate::models::structure::{ModelStructure, SeriesStructure};
pub use crate::observations::ObservationMatrix;
pub use crate::smoother::{KalmanSmoother, SmootherResult};
pub use crate::variance::{Priors, VariancePrior, VarianceSampler, Variances};
