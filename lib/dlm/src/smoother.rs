//! Rauch–Tung–Striebel smoother
//!
//! ```text
//! s_n = m_n,  S_n = C_n
//! J_t = C_t Gᵀ R_{t+1}⁺
//! s_t = m_t + J_t (s_{t+1} − a_{t+1})
//! S_t = J_t S_{t+1} J_tᵀ + (C_t − J_t R_{t+1} J_tᵀ)
//! ```
//!
//! The gain and the conditional covariance `C_t − J_t R_{t+1} J_tᵀ` are the
//! same quantities the backward sampler draws from, so both share
//! [`backward_step`]. The conditional covariance is factored from the
//! Joseph-form pre-array `[L_Cᵀ (I − J_t G)ᵀ ; W^{½} J_tᵀ]` and never formed
//! by subtraction.

use nalgebra::{DMatrix, DVector};

use crate::error::DlmError;
use crate::filter::{FilterResult, stack_rows};
use crate::linalg::SqrtCov;
use crate::models::StateSpaceModel;

/// Gain and conditional covariance of θ_t given θ_{t+1} and y_{1:t}.
#[derive(Debug, Clone)]
pub(crate) struct BackwardStep {
    pub(crate) gain: DMatrix<f64>,
    pub(crate) cond: SqrtCov,
}

/// Backward quantities at `t` in `0..n`.
pub(crate) fn backward_step(
    model: &StateSpaceModel,
    fr: &FilterResult,
    t: usize,
) -> Result<BackwardStep, DlmError> {
    let cov = fr.cov(t);
    let next = &fr.steps()[t];
    let gain = cov.dense() * model.g().transpose() * next.r.pinv();
    // Joseph form (I − J G) C (I − J G)ᵀ + J W Jᵀ, equal to C − J R Jᵀ
    let n = model.n_state();
    let keep = DMatrix::identity(n, n) - &gain * model.g();
    let pre = stack_rows(
        &(cov.root_rows() * keep.transpose()),
        &(model.w_rows() * gain.transpose()),
    );
    let cond = SqrtCov::from_pre_array(pre)
        .filter(SqrtCov::is_finite)
        .ok_or_else(|| {
            DlmError::numerical(t, "backward conditional covariance factorisation failed")
        })?;
    Ok(BackwardStep { gain, cond })
}

/// Smoothed distributions for t = 0..n and the implied per-series signal.
#[derive(Debug, Clone)]
pub struct SmootherResult {
    means: Vec<DVector<f64>>,
    covs: Vec<SqrtCov>,
    signal_means: Vec<DVector<f64>>,
    signal_vars: Vec<DVector<f64>>,
}

impl SmootherResult {
    pub fn n_steps(&self) -> usize {
        self.means.len() - 1
    }

    /// Smoothed state mean s_t, t = 0..n.
    pub fn mean(&self, t: usize) -> &DVector<f64> {
        &self.means[t]
    }

    /// Smoothed state covariance S_t, t = 0..n.
    pub fn cov(&self, t: usize) -> &SqrtCov {
        &self.covs[t]
    }

    /// Smoothed signal of series `i` for t = 1..n: mean F s_t and variance
    /// diag(F S_t Fᵀ).
    /// `None` if the model has no series `i`.
    pub fn series(&self, i: usize) -> Option<(Vec<f64>, Vec<f64>)> {
        if self.signal_means.first().is_none_or(|m| i >= m.len()) {
            return None;
        }
        Some(
            self.signal_means
                .iter()
                .zip(&self.signal_vars)
                .map(|(m, v)| (m[i], v[i]))
                .unzip(),
        )
    }
}

/// Backward pass over a completed filter run.
#[derive(Debug, Clone, Copy)]
pub struct KalmanSmoother<'a> {
    model: &'a StateSpaceModel,
}

impl<'a> KalmanSmoother<'a> {
    pub fn new(model: &'a StateSpaceModel) -> Self {
        Self { model }
    }

    /// Smooth a filter result produced with the same model.
    pub fn smooth(&self, fr: &FilterResult) -> Result<SmootherResult, DlmError> {
        let model = self.model;
        let n = fr.n_steps();
        if n == 0 {
            return Err(DlmError::InvalidObservations(
                "filter result has no time steps".to_string(),
            ));
        }
        if fr.mean(0).len() != model.n_state() {
            return Err(DlmError::InvalidModel(
                "filter result does not match the model state dimension".to_string(),
            ));
        }

        let mut means = vec![DVector::zeros(0); n + 1];
        let mut covs = Vec::with_capacity(n + 1);
        means[n] = fr.mean(n).clone();
        covs.push(fr.cov(n).clone());

        for t in (0..n).rev() {
            let step = backward_step(model, fr, t)?;
            let next_mean = &means[t + 1];
            let next_cov = covs.last().ok_or_else(|| {
                DlmError::numerical(t, "smoother lost its running covariance")
            })?;

            let s = fr.mean(t) + &step.gain * (next_mean - &fr.steps()[t].a);
            let pre = stack_rows(
                &(next_cov.root_rows() * step.gain.transpose()),
                &step.cond.root_rows(),
            );
            let cov = SqrtCov::from_pre_array(pre)
                .filter(SqrtCov::is_finite)
                .ok_or_else(|| DlmError::numerical(t, "smoothed covariance factorisation failed"))?;
            if s.iter().any(|x| !x.is_finite()) {
                return Err(DlmError::numerical(t, "non-finite smoothed mean"));
            }
            means[t] = s;
            covs.push(cov);
        }
        covs.reverse();

        let f = model.f();
        let (signal_means, signal_vars) = (1..=n)
            .map(|t| {
                let fl = f * covs[t].root();
                let var = DVector::from_fn(f.nrows(), |i, _| fl.row(i).norm_squared());
                (f * &means[t], var)
            })
            .unzip();

        Ok(SmootherResult {
            means,
            covs,
            signal_means,
            signal_vars,
        })
    }
}
