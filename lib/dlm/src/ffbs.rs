//! Forward-filtering backward-sampling
//!
//! Draws one latent trajectory Θ_{0:n} from p(Θ | y_{1:n}, θ):
//! Θ_n ~ N(m_n, C_n), then for t = n−1..0
//! Θ_t ~ N(m_t + J_t (Θ_{t+1} − a_{t+1}), C_t − J_t R_{t+1} J_tᵀ).

use nalgebra::DVector;
use rand::Rng;

use crate::error::DlmError;
use crate::filter::FilterResult;
use crate::models::StateSpaceModel;
use crate::smoother::backward_step;

/// Sampled latent states Θ_0..Θ_n.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    states: Vec<DVector<f64>>,
}

impl Trajectory {
    /// Number of observation steps n (the trajectory holds n + 1 states).
    pub fn n_steps(&self) -> usize {
        self.states.len() - 1
    }

    pub fn state(&self, t: usize) -> &DVector<f64> {
        &self.states[t]
    }

    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }
}

/// Backward sampler over one model. The random source is passed per draw.
#[derive(Debug, Clone, Copy)]
pub struct BackwardSampler<'a> {
    model: &'a StateSpaceModel,
}

impl<'a> BackwardSampler<'a> {
    pub fn new(model: &'a StateSpaceModel) -> Self {
        Self { model }
    }

    /// Draw a trajectory given a filter run of the same model.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        fr: &FilterResult,
        rng: &mut R,
    ) -> Result<Trajectory, DlmError> {
        let n = fr.n_steps();
        let mut states = vec![DVector::zeros(self.model.n_state()); n + 1];
        states[n] = fr.mean(n) + fr.cov(n).sample_offset(rng);

        for t in (0..n).rev() {
            let step = backward_step(self.model, fr, t)?;
            let mean = fr.mean(t) + &step.gain * (&states[t + 1] - &fr.steps()[t].a);
            let draw = mean + step.cond.sample_offset(rng);
            if draw.iter().any(|x| !x.is_finite()) {
                return Err(DlmError::numerical(t, "non-finite sampled state"));
            }
            states[t] = draw;
        }
        if states[n].iter().any(|x| !x.is_finite()) {
            return Err(DlmError::numerical(n, "non-finite sampled state"));
        }
        Ok(Trajectory { states })
    }
}
