//! Conjugate updates of the noise covariances
//!
//! Given a sampled trajectory Θ, the state innovations `Θ_t − G Θ_{t−1}` and
//! the observation residuals `y_t − F Θ_t` are Gaussian with covariance W
//! and V, so inverse-gamma (per component) and inverse-Wishart (full block)
//! priors stay conjugate.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::dist::{InverseGamma, InverseWishart};
use crate::error::DlmError;
use crate::ffbs::Trajectory;
use crate::models::StateSpaceModel;
use crate::observations::ObservationMatrix;

/// Prior on one covariance block.
#[derive(Debug, Clone, PartialEq)]
pub enum VariancePrior {
    /// Independent `InvGamma(shape, rate)` on every diagonal entry; off-diagonals stay 0.
    InverseGamma { shape: f64, rate: f64 },
    /// `InvWishart(dof, scale)` on the full block.
    InverseWishart { dof: f64, scale: DMatrix<f64> },
}

impl VariancePrior {
    fn validate(&self, dim: usize, block: &str) -> Result<(), DlmError> {
        match self {
            VariancePrior::InverseGamma { shape, rate } => {
                InverseGamma::new(*shape, *rate).map_err(|e| in_block(e, block))?;
            }
            VariancePrior::InverseWishart { dof, scale } => {
                if scale.nrows() != dim {
                    return Err(DlmError::InvalidPrior(format!(
                        "{} block: scale must be {}x{}, got {}x{}",
                        block,
                        dim,
                        dim,
                        scale.nrows(),
                        scale.ncols()
                    )));
                }
                InverseWishart::new(*dof, scale.clone()).map_err(|e| in_block(e, block))?;
            }
        }
        Ok(())
    }
}

fn in_block(err: DlmError, block: &str) -> DlmError {
    match err {
        DlmError::InvalidPrior(msg) => DlmError::InvalidPrior(format!("{} block: {}", block, msg)),
        other => other,
    }
}

/// Priors for the observation (V) and state (W) blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Priors {
    pub v: VariancePrior,
    pub w: VariancePrior,
}

impl Priors {
    /// Inverse-gamma on every diagonal entry of V and W.
    pub fn inverse_gamma(shape_v: f64, rate_v: f64, shape_w: f64, rate_w: f64) -> Self {
        Self {
            v: VariancePrior::InverseGamma {
                shape: shape_v,
                rate: rate_v,
            },
            w: VariancePrior::InverseGamma {
                shape: shape_w,
                rate: rate_w,
            },
        }
    }

    /// Check hyperparameters against the series count p and state dimension d.
    pub fn validate(&self, p: usize, d: usize) -> Result<(), DlmError> {
        self.v.validate(p, "observation")?;
        self.w.validate(d, "state")
    }
}

impl Default for Priors {
    /// Weakly informative `InvGamma(1, 1)` on every component.
    fn default() -> Self {
        Self::inverse_gamma(1.0, 1.0, 1.0, 1.0)
    }
}

/// A draw of both noise covariances.
#[derive(Debug, Clone, PartialEq)]
pub struct Variances {
    pub v: DMatrix<f64>,
    pub w: DMatrix<f64>,
}

/// Residual sums computed from one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct SufficientStats {
    /// Σ_t e_t e_tᵀ over the n state innovations.
    pub state_cross: DMatrix<f64>,
    /// Number of state innovations (n).
    pub state_count: usize,
    /// Per-series sum of squared residuals over observed cells.
    pub obs_ss: DVector<f64>,
    /// Per-series number of observed cells.
    pub obs_count: Vec<usize>,
    /// Σ r_t r_tᵀ over fully observed rows only.
    pub obs_cross_complete: DMatrix<f64>,
    /// Number of fully observed rows.
    pub complete_rows: usize,
}

impl SufficientStats {
    pub fn compute(
        y: &ObservationMatrix,
        traj: &Trajectory,
        model: &StateSpaceModel,
    ) -> Result<Self, DlmError> {
        let n = y.n_steps();
        let p = model.n_series();
        let d = model.n_state();
        if traj.n_steps() != n || y.n_series() != p {
            return Err(DlmError::InvalidObservations(format!(
                "trajectory covers {} steps, observations {} steps",
                traj.n_steps(),
                n
            )));
        }

        let mut state_cross = DMatrix::zeros(d, d);
        let mut obs_ss = DVector::zeros(p);
        let mut obs_count = vec![0; p];
        let mut obs_cross_complete = DMatrix::zeros(p, p);
        let mut complete_rows = 0;

        for t in 1..=n {
            let e = traj.state(t) - model.g() * traj.state(t - 1);
            state_cross.ger(1.0, &e, &e, 1.0);

            let fitted = model.f() * traj.state(t);
            let mut resid = DVector::zeros(p);
            for (i, cell) in y.row(t - 1).iter().enumerate() {
                if let Some(obs) = cell {
                    let r = obs - fitted[i];
                    resid[i] = r;
                    obs_ss[i] += r * r;
                    obs_count[i] += 1;
                }
            }
            if y.is_complete(t - 1) {
                obs_cross_complete.ger(1.0, &resid, &resid, 1.0);
                complete_rows += 1;
            }
        }

        Ok(Self {
            state_cross,
            state_count: n,
            obs_ss,
            obs_count,
            obs_cross_complete,
            complete_rows,
        })
    }
}

/// Draws (V, W) from their full conditionals.
#[derive(Debug, Clone)]
pub struct VarianceSampler {
    priors: Priors,
}

impl VarianceSampler {
    /// # Errors
    ///
    /// [`DlmError::InvalidPrior`] when a hyperparameter is unusable for a
    /// model with `p` series and `d` states.
    pub fn new(priors: Priors, p: usize, d: usize) -> Result<Self, DlmError> {
        priors.validate(p, d)?;
        Ok(Self { priors })
    }

    pub fn priors(&self) -> &Priors {
        &self.priors
    }

    pub fn sample<R: Rng + ?Sized>(
        &self,
        y: &ObservationMatrix,
        traj: &Trajectory,
        model: &StateSpaceModel,
        rng: &mut R,
    ) -> Result<Variances, DlmError> {
        let stats = SufficientStats::compute(y, traj, model)?;
        self.sample_from_stats(&stats, rng)
    }

    pub fn sample_from_stats<R: Rng + ?Sized>(
        &self,
        stats: &SufficientStats,
        rng: &mut R,
    ) -> Result<Variances, DlmError> {
        let v = match &self.priors.v {
            VariancePrior::InverseGamma { shape, rate } => {
                let prior = InverseGamma::new(*shape, *rate)?;
                let draws = stats
                    .obs_ss
                    .iter()
                    .zip(&stats.obs_count)
                    .map(|(ss, n)| prior.posterior(*n, *ss)?.sample(rng))
                    .collect::<Result<Vec<_>, _>>()?;
                diagonal_draw(draws, "observation")?
            }
            VariancePrior::InverseWishart { dof, scale } => {
                let post = InverseWishart::new(*dof, scale.clone())?
                    .posterior(stats.complete_rows, &stats.obs_cross_complete)?;
                full_draw(post.sample(rng), "observation")?
            }
        };

        let w = match &self.priors.w {
            VariancePrior::InverseGamma { shape, rate } => {
                let prior = InverseGamma::new(*shape, *rate)?;
                let draws = stats
                    .state_cross
                    .diagonal()
                    .iter()
                    .map(|ss| prior.posterior(stats.state_count, *ss)?.sample(rng))
                    .collect::<Result<Vec<_>, _>>()?;
                diagonal_draw(draws, "state")?
            }
            VariancePrior::InverseWishart { dof, scale } => {
                let post = InverseWishart::new(*dof, scale.clone())?
                    .posterior(stats.state_count, &stats.state_cross)?;
                full_draw(post.sample(rng), "state")?
            }
        };

        Ok(Variances { v, w })
    }
}

fn diagonal_draw(draws: Vec<f64>, block: &'static str) -> Result<DMatrix<f64>, DlmError> {
    if draws.iter().any(|x| !(x.is_finite() && *x > 0.0)) {
        return Err(DlmError::NonPositiveDefiniteDraw { block });
    }
    Ok(DMatrix::from_diagonal(&DVector::from_vec(draws)))
}

fn full_draw(
    draw: Result<DMatrix<f64>, DlmError>,
    block: &'static str,
) -> Result<DMatrix<f64>, DlmError> {
    let m = draw.map_err(|e| match e {
        DlmError::NonPositiveDefiniteDraw { .. } => DlmError::NonPositiveDefiniteDraw { block },
        other => other,
    })?;
    let m = crate::linalg::symmetrize(&m);
    if m.iter().any(|x| !x.is_finite()) || m.clone().cholesky().is_none() {
        return Err(DlmError::NonPositiveDefiniteDraw { block });
    }
    Ok(m)
}
