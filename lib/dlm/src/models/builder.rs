//! Parameter vector → model

use nalgebra::{DMatrix, DVector};

use crate::error::DlmError;
use crate::models::StateSpaceModel;
use crate::models::structure::ModelStructure;

/// Builds [`StateSpaceModel`]s that share one structure.
///
/// F, G and the prior are computed once; only V and W change between builds.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    structure: ModelStructure,
    f: DMatrix<f64>,
    g: DMatrix<f64>,
}

impl ModelBuilder {
    pub fn new(structure: ModelStructure) -> Result<Self, DlmError> {
        if structure.n_series() == 0 {
            return Err(DlmError::InvalidModel(
                "at least one series is required".to_string(),
            ));
        }
        for s in structure.series() {
            s.validate()?;
        }
        let c0 = structure.initial_variance();
        if !c0.is_finite() || c0 <= 0.0 {
            return Err(DlmError::InvalidModel(format!(
                "initial state variance must be finite and > 0, got {}",
                c0
            )));
        }
        let (f, g) = structure.system_matrices();
        Ok(Self { structure, f, g })
    }

    pub fn structure(&self) -> &ModelStructure {
        &self.structure
    }

    /// Length of the parameter vector.
    pub fn n_params(&self) -> usize {
        self.structure.n_params()
    }

    /// Split θ into the diagonals of V and W.
    ///
    /// # Errors
    ///
    /// [`DlmError::ParameterLength`] on a wrong length,
    /// [`DlmError::NegativeVariance`] on a negative or non-finite entry.
    pub fn unpack(&self, theta: &[f64]) -> Result<(DVector<f64>, DVector<f64>), DlmError> {
        let expected = self.n_params();
        if theta.len() != expected {
            return Err(DlmError::ParameterLength {
                expected,
                got: theta.len(),
            });
        }
        if let Some((index, &value)) = theta
            .iter()
            .enumerate()
            .find(|(_, v)| !v.is_finite() || **v < 0.0)
        {
            return Err(DlmError::NegativeVariance { index, value });
        }
        let p = self.structure.n_series();
        let v = DVector::from_fn(p, |i, _| theta[self.structure.obs_variance_index(i)]);
        let w = DVector::from_iterator(
            self.structure.n_state(),
            self.structure
                .state_variance_indices()
                .into_iter()
                .map(|k| theta[k]),
        );
        Ok((v, w))
    }

    /// Build M(θ). Pure.
    pub fn build(&self, theta: &[f64]) -> Result<StateSpaceModel, DlmError> {
        let (v, w) = self.unpack(theta)?;
        self.with_variances(DMatrix::from_diagonal(&v), DMatrix::from_diagonal(&w))
    }

    /// Build a model from full noise covariances.
    pub fn with_variances(
        &self,
        v: DMatrix<f64>,
        w: DMatrix<f64>,
    ) -> Result<StateSpaceModel, DlmError> {
        let d = self.structure.n_state();
        StateSpaceModel::new(
            self.f.clone(),
            self.g.clone(),
            v,
            w,
            DVector::zeros(d),
            DMatrix::identity(d, d) * self.structure.initial_variance(),
        )
    }

    /// Inverse of [`ModelBuilder::unpack`]: lay the diagonals of V and W out
    /// as a parameter vector.
    pub fn pack(&self, v: &DMatrix<f64>, w: &DMatrix<f64>) -> Result<Vec<f64>, DlmError> {
        let p = self.structure.n_series();
        let d = self.structure.n_state();
        if v.shape() != (p, p) || w.shape() != (d, d) {
            return Err(DlmError::InvalidModel(format!(
                "expected V {}x{} and W {}x{}, got {:?} and {:?}",
                p,
                p,
                d,
                d,
                v.shape(),
                w.shape()
            )));
        }
        let mut theta = vec![0.0; self.n_params()];
        for i in 0..p {
            theta[self.structure.obs_variance_index(i)] = v[(i, i)];
        }
        for (j, k) in self.structure.state_variance_indices().into_iter().enumerate() {
            theta[k] = w[(j, j)];
        }
        Ok(theta)
    }
}
