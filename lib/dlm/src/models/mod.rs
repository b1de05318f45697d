//! State space models module
//!
//! Provides the linear-Gaussian model container and the structures that
//! generate its system matrices.
//!
//! ```text
//! state:        θ_t = G θ_{t-1} + w_t,   w_t ~ N(0, W)
//! observation:  y_t = F θ_t     + v_t,   v_t ~ N(0, V)
//! prior:        θ_0 ~ N(m0, C0)
//! ```

use nalgebra::{DMatrix, DVector};

use crate::error::DlmError;
use crate::linalg::{SqrtCov, psd_tolerance, symmetrize};

pub mod builder;
pub mod structure;

/// Default prior variance of the initial state (diffuse).
pub const DIFFUSE_VARIANCE: f64 = 1e7;

/// Time-invariant linear-Gaussian state-space model with validated shapes.
#[derive(Debug, Clone)]
pub struct StateSpaceModel {
    f: DMatrix<f64>,
    g: DMatrix<f64>,
    v: DMatrix<f64>,
    w: DMatrix<f64>,
    m0: DVector<f64>,
    c0: SqrtCov,
    w_rows: DMatrix<f64>,
}

fn check_square(name: &str, m: &DMatrix<f64>, n: usize) -> Result<(), DlmError> {
    if m.nrows() != n || m.ncols() != n {
        return Err(DlmError::InvalidModel(format!(
            "{} must be {}x{}, got {}x{}",
            name,
            n,
            n,
            m.nrows(),
            m.ncols()
        )));
    }
    Ok(())
}

fn factor_covariance(name: &str, m: &DMatrix<f64>) -> Result<SqrtCov, DlmError> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(DlmError::InvalidModel(format!("{} must be finite", name)));
    }
    let asym = (m - m.transpose()).amax();
    if asym > 1e-9 * m.amax().max(1.0) {
        return Err(DlmError::InvalidModel(format!(
            "{} must be symmetric (max asymmetry {})",
            name, asym
        )));
    }
    SqrtCov::from_symmetric(m, psd_tolerance(m)).ok_or_else(|| {
        DlmError::InvalidModel(format!("{} must be positive semi-definite", name))
    })
}

impl StateSpaceModel {
    /// Create a model and validate every matrix once.
    ///
    /// # Errors
    ///
    /// Returns [`DlmError::InvalidModel`] if shapes disagree, an entry is not
    /// finite, or V, W, C0 are not symmetric positive semi-definite.
    pub fn new(
        f: DMatrix<f64>,
        g: DMatrix<f64>,
        v: DMatrix<f64>,
        w: DMatrix<f64>,
        m0: DVector<f64>,
        c0: DMatrix<f64>,
    ) -> Result<Self, DlmError> {
        let d = g.nrows();
        if d == 0 {
            return Err(DlmError::InvalidModel("state dimension must be > 0".to_string()));
        }
        check_square("G", &g, d)?;
        let p = f.nrows();
        if p == 0 || f.ncols() != d {
            return Err(DlmError::InvalidModel(format!(
                "F must be p x {} with p > 0, got {}x{}",
                d,
                f.nrows(),
                f.ncols()
            )));
        }
        check_square("V", &v, p)?;
        check_square("W", &w, d)?;
        check_square("C0", &c0, d)?;
        if m0.len() != d {
            return Err(DlmError::InvalidModel(format!(
                "m0 must have length {}, got {}",
                d,
                m0.len()
            )));
        }
        if f.iter().chain(g.iter()).chain(m0.iter()).any(|x| !x.is_finite()) {
            return Err(DlmError::InvalidModel("F, G and m0 must be finite".to_string()));
        }
        factor_covariance("V", &v)?;
        let w_factor = factor_covariance("W", &w)?;
        let c0 = factor_covariance("C0", &c0)?;

        Ok(Self {
            f,
            g,
            v: symmetrize(&v),
            w: symmetrize(&w),
            m0,
            c0,
            w_rows: w_factor.root_rows(),
        })
    }

    /// Observation matrix F (p × d).
    pub fn f(&self) -> &DMatrix<f64> {
        &self.f
    }

    /// Transition matrix G (d × d).
    pub fn g(&self) -> &DMatrix<f64> {
        &self.g
    }

    /// Observation noise covariance V (p × p).
    pub fn v(&self) -> &DMatrix<f64> {
        &self.v
    }

    /// State noise covariance W (d × d).
    pub fn w(&self) -> &DMatrix<f64> {
        &self.w
    }

    /// Prior mean of the initial state.
    pub fn m0(&self) -> &DVector<f64> {
        &self.m0
    }

    /// Prior covariance of the initial state, factored.
    pub fn c0(&self) -> &SqrtCov {
        &self.c0
    }

    /// Pre-array rows `W^{1/2}` with `(W^{1/2})ᵀ W^{1/2} = W`.
    pub(crate) fn w_rows(&self) -> &DMatrix<f64> {
        &self.w_rows
    }

    /// Number of state dimensions d.
    pub fn n_state(&self) -> usize {
        self.g.nrows()
    }

    /// Number of observed series p.
    pub fn n_series(&self) -> usize {
        self.f.nrows()
    }
}
