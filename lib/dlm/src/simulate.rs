//! Synthetic data from a state-space model

use nalgebra::DVector;
use rand::Rng;

use crate::error::DlmError;
use crate::linalg::{SqrtCov, psd_tolerance};
use crate::models::StateSpaceModel;
use crate::observations::ObservationMatrix;

/// A simulated state path and the readings it produced.
#[derive(Debug, Clone)]
pub struct Simulation {
    /// θ_0..θ_n.
    pub states: Vec<DVector<f64>>,
    /// Complete n × p readings.
    pub readings: Vec<Vec<f64>>,
}

impl Simulation {
    pub fn observations(&self) -> Result<ObservationMatrix, DlmError> {
        ObservationMatrix::from_f64_rows(&self.readings)
    }

    /// Observations with cell (t, i) removed wherever `missing(t, i)` holds
    /// (`t` is the 0-based row).
    pub fn observations_with_missing<F>(&self, missing: F) -> Result<ObservationMatrix, DlmError>
    where
        F: Fn(usize, usize) -> bool,
    {
        ObservationMatrix::from_rows(
            self.readings
                .iter()
                .enumerate()
                .map(|(t, row)| {
                    row.iter()
                        .enumerate()
                        .map(|(i, v)| (!missing(t, i)).then_some(*v))
                        .collect()
                })
                .collect(),
        )
    }

    /// Noise-free signal F θ_t of series `i` for t = 1..n.
    pub fn signal(&self, model: &StateSpaceModel, i: usize) -> Vec<f64> {
        self.states[1..]
            .iter()
            .map(|s| (model.f().row(i) * s)[0])
            .collect()
    }
}

/// Simulate `n` steps starting from a fixed initial state.
pub fn simulate<R: Rng + ?Sized>(
    model: &StateSpaceModel,
    initial_state: DVector<f64>,
    n: usize,
    rng: &mut R,
) -> Result<Simulation, DlmError> {
    if initial_state.len() != model.n_state() {
        return Err(DlmError::InvalidModel(format!(
            "initial state has length {}, model has {} states",
            initial_state.len(),
            model.n_state()
        )));
    }
    let w = SqrtCov::from_symmetric(model.w(), psd_tolerance(model.w()))
        .ok_or_else(|| DlmError::InvalidModel("W is not PSD".to_string()))?;
    let v = SqrtCov::from_symmetric(model.v(), psd_tolerance(model.v()))
        .ok_or_else(|| DlmError::InvalidModel("V is not PSD".to_string()))?;

    let mut states = Vec::with_capacity(n + 1);
    let mut readings = Vec::with_capacity(n);
    states.push(initial_state);
    for t in 1..=n {
        let state = model.g() * &states[t - 1] + w.sample_offset(rng);
        let y = model.f() * &state + v.sample_offset(rng);
        readings.push(y.iter().copied().collect());
        states.push(state);
    }
    Ok(Simulation { states, readings })
}
