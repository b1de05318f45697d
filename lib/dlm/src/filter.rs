//! Kalman filter with missing observation components
//!
//! For t = 1..n:
//!
//! ```text
//! predict:  a_t = G m_{t-1}          R_t = G C_{t-1} Gᵀ + W
//! update:   Q_t = F R_t Fᵀ + V       K_t = R_t Fᵀ Q_t⁻¹
//!           m_t = a_t + K_t (y_t − F a_t)
//!           C_t = (I − K_t F) R_t (I − K_t F)ᵀ + K_t V K_tᵀ
//! ```
//!
//! Rows of F, V and y_t belonging to missing series are dropped before the
//! update; when no series is observed the filtered distribution equals the
//! predicted one. Both covariances are carried as [`SqrtCov`] factors built
//! from pre-arrays, never by subtracting dense matrices.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::error::DlmError;
use crate::linalg::{SqrtCov, psd_tolerance, symmetrize};
use crate::models::StateSpaceModel;
use crate::observations::ObservationMatrix;

/// Innovation covariances with `λ_min ≤ INNOVATION_RTOL · λ_max` are singular.
const INNOVATION_RTOL: f64 = 1e-13;

/// Predictive and filtered distributions at one time step.
#[derive(Debug, Clone)]
pub struct FilterStep {
    /// Predicted state mean a_t.
    pub a: DVector<f64>,
    /// Predicted state covariance R_t.
    pub r: SqrtCov,
    /// Filtered state mean m_t.
    pub m: DVector<f64>,
    /// Filtered state covariance C_t.
    pub c: SqrtCov,
    /// One-step forecast mean F a_t, one entry per series.
    pub forecast_mean: DVector<f64>,
    /// One-step forecast variance diag(F R_t Fᵀ + V), one entry per series.
    pub forecast_var: DVector<f64>,
    /// Series that contributed to the update.
    pub observed: Vec<usize>,
}

/// Output of [`KalmanFilter::filter`].
#[derive(Debug, Clone)]
pub struct FilterResult {
    m0: DVector<f64>,
    c0: SqrtCov,
    steps: Vec<FilterStep>,
    log_likelihood: f64,
}

impl FilterResult {
    /// Number of observation steps n.
    pub fn n_steps(&self) -> usize {
        self.steps.len()
    }

    /// Steps for t = 1..n, stored at index t − 1.
    pub fn steps(&self) -> &[FilterStep] {
        &self.steps
    }

    /// Filtered mean m_t for t = 0..n (t = 0 is the prior).
    pub fn mean(&self, t: usize) -> &DVector<f64> {
        if t == 0 { &self.m0 } else { &self.steps[t - 1].m }
    }

    /// Filtered covariance C_t for t = 0..n.
    pub fn cov(&self, t: usize) -> &SqrtCov {
        if t == 0 { &self.c0 } else { &self.steps[t - 1].c }
    }

    /// Gaussian log-likelihood log p(y_{1:n} | θ) over the observed cells.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// One-step forecast (mean, variance) of series `i` for t = 1..n, or
    /// `None` if the model has no series `i`.
    pub fn forecast(&self, i: usize) -> Option<(Vec<f64>, Vec<f64>)> {
        if i >= self.n_series() {
            return None;
        }
        Some(
            self.steps
                .iter()
                .map(|s| (s.forecast_mean[i], s.forecast_var[i]))
                .unzip(),
        )
    }

    fn n_series(&self) -> usize {
        self.steps.first().map_or(0, |s| s.forecast_mean.len())
    }

    /// Filtered means of every time step, including t = 0.
    pub fn filtered_means(&self) -> Vec<DVector<f64>> {
        (0..=self.n_steps()).map(|t| self.mean(t).clone()).collect()
    }
}

/// Inverse and log-determinant of an innovation covariance.
struct Innovation {
    inverse: DMatrix<f64>,
    log_det: f64,
}

fn invert_innovation(q: &DMatrix<f64>, timestep: usize) -> Result<Innovation, DlmError> {
    if let Some(chol) = q.clone().cholesky() {
        let diag = chol.l_dirty().diagonal();
        let lo = diag.min();
        let hi = diag.max();
        if lo > 0.0 && lo * lo > INNOVATION_RTOL * hi * hi {
            let log_det = 2.0 * diag.iter().map(|x| x.ln()).sum::<f64>();
            return Ok(Innovation {
                inverse: chol.inverse(),
                log_det,
            });
        }
    }

    tracing::debug!(timestep, "innovation covariance falling back to eigen-factorisation");
    let eig = SymmetricEigen::try_new(q.clone(), f64::EPSILON, 0)
        .ok_or_else(|| DlmError::numerical(timestep, "eigen-decomposition did not converge"))?;
    let hi = eig.eigenvalues.max();
    let lo = eig.eigenvalues.min();
    if !(hi > 0.0) || lo <= INNOVATION_RTOL * hi {
        return Err(DlmError::numerical(
            timestep,
            format!("innovation covariance is singular (eigenvalues {:.3e}..{:.3e})", lo, hi),
        ));
    }
    let mut scaled = eig.eigenvectors.clone();
    for (j, l) in eig.eigenvalues.iter().enumerate() {
        scaled.column_mut(j).scale_mut(1.0 / l);
    }
    Ok(Innovation {
        inverse: symmetrize(&(scaled * eig.eigenvectors.transpose())),
        log_det: eig.eigenvalues.iter().map(|l| l.ln()).sum(),
    })
}

/// Forward recursion over one model.
#[derive(Debug, Clone, Copy)]
pub struct KalmanFilter<'a> {
    model: &'a StateSpaceModel,
}

impl<'a> KalmanFilter<'a> {
    pub fn new(model: &'a StateSpaceModel) -> Self {
        Self { model }
    }

    /// Run the filter over every row of `y`.
    ///
    /// # Errors
    ///
    /// [`DlmError::InvalidObservations`] if `y` has the wrong number of
    /// series, [`DlmError::NumericalFailure`] naming the step where a
    /// covariance could not be factored or a non-finite value appeared.
    pub fn filter(&self, y: &ObservationMatrix) -> Result<FilterResult, DlmError> {
        let model = self.model;
        let p = model.n_series();
        if y.n_series() != p {
            return Err(DlmError::InvalidObservations(format!(
                "model has {} series, observations have {}",
                p,
                y.n_series()
            )));
        }

        let ln_2pi = (2.0 * std::f64::consts::PI).ln();
        let g_t = model.g().transpose();
        let v_diag = model.v().diagonal();

        let mut steps: Vec<FilterStep> = Vec::with_capacity(y.n_steps());
        let mut log_likelihood = 0.0;

        for t in 1..=y.n_steps() {
            let (m_prev, c_prev) = match steps.last() {
                Some(s) => (&s.m, &s.c),
                None => (model.m0(), model.c0()),
            };

            let a = model.g() * m_prev;
            let mut pre = c_prev.root_rows() * &g_t;
            pre = stack_rows(&pre, model.w_rows());
            let r = SqrtCov::from_pre_array(pre)
                .ok_or_else(|| DlmError::numerical(t, "predicted covariance factorisation failed"))?;

            let l_r = r.root();
            let fl = model.f() * &l_r;
            let forecast_mean = model.f() * &a;
            let forecast_var =
                DVector::from_fn(p, |i, _| fl.row(i).norm_squared() + v_diag[i]);

            let observed = y.observed_indices(t - 1);
            let (m, c) = if observed.is_empty() {
                (a.clone(), r.clone())
            } else {
                let q_n = observed.len();
                let f_o = model.f().select_rows(&observed);
                let v_o = model.v().select_rows(&observed).select_columns(&observed);
                let y_o = DVector::from_iterator(
                    q_n,
                    observed.iter().map(|&i| y.get(t - 1, i).unwrap_or(0.0)),
                );

                let fl_o = fl.select_rows(&observed);
                let q = symmetrize(&(&fl_o * fl_o.transpose() + &v_o));
                let inn = invert_innovation(&q, t)?;

                let e = y_o - &f_o * &a;
                log_likelihood +=
                    -0.5 * (q_n as f64 * ln_2pi + inn.log_det + e.dot(&(&inn.inverse * &e)));

                // K = R F_oᵀ Q⁻¹ with R F_oᵀ = L_R (F_o L_R)ᵀ
                let k = &l_r * fl_o.transpose() * &inn.inverse;
                let m = &a + &k * &e;

                let d = model.n_state();
                let i_kf = DMatrix::<f64>::identity(d, d) - &k * &f_o;
                let v_rows = SqrtCov::from_symmetric(&v_o, psd_tolerance(&v_o))
                    .ok_or_else(|| DlmError::numerical(t, "observation covariance is not PSD"))?
                    .root_rows();
                let joseph = stack_rows(&(r.root_rows() * i_kf.transpose()), &(v_rows * k.transpose()));
                let c = SqrtCov::from_pre_array(joseph).ok_or_else(|| {
                    DlmError::numerical(t, "filtered covariance factorisation failed")
                })?;
                (m, c)
            };

            if m.iter().any(|x| !x.is_finite())
                || !c.is_finite()
                || forecast_var.iter().any(|x| !x.is_finite())
            {
                return Err(DlmError::numerical(t, "non-finite filtered state"));
            }

            steps.push(FilterStep {
                a,
                r,
                m,
                c,
                forecast_mean,
                forecast_var,
                observed,
            });
        }

        if !log_likelihood.is_finite() {
            return Err(DlmError::numerical(y.n_steps(), "log-likelihood is not finite"));
        }

        Ok(FilterResult {
            m0: model.m0().clone(),
            c0: model.c0().clone(),
            steps,
            log_likelihood,
        })
    }
}

/// `[top; bottom]`.
pub(crate) fn stack_rows(top: &DMatrix<f64>, bottom: &DMatrix<f64>) -> DMatrix<f64> {
    let cols = top.ncols();
    let mut out = DMatrix::zeros(top.nrows() + bottom.nrows(), cols);
    out.rows_mut(0, top.nrows()).copy_from(top);
    out.rows_mut(top.nrows(), bottom.nrows()).copy_from(bottom);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::builder::ModelBuilder;
    use crate::models::structure::ModelStructure;

    /// Hand-written scalar local-level recursion.
    fn scalar_filter(ys: &[Option<f64>], v: f64, w: f64, c0: f64) -> Vec<(f64, f64)> {
        let mut m = 0.0;
        let mut c = c0;
        let mut out = Vec::new();
        for y in ys {
            let r = c + w;
            match y {
                Some(y) => {
                    let k = r / (r + v);
                    m += k * (y - m);
                    c = (1.0 - k) * r;
                }
                None => c = r,
            }
            out.push((m, c));
        }
        out
    }

    fn local_level(v: f64, w: f64) -> StateSpaceModel {
        ModelBuilder::new(ModelStructure::local_level(1).with_initial_variance(10.0))
            .expect("valid structure")
            .build(&[v, w])
            .expect("valid theta")
    }

    #[test]
    fn test_matches_scalar_reference() {
        let ys = vec![Some(1.0), Some(1.5), None, Some(0.7), Some(2.2), None, None, Some(1.1)];
        let y = ObservationMatrix::univariate(&ys).expect("valid");
        let model = local_level(0.5, 0.2);
        let fr = KalmanFilter::new(&model).filter(&y).expect("filter");
        let expected = scalar_filter(&ys, 0.5, 0.2, 10.0);

        for (t, (m, c)) in expected.iter().enumerate() {
            assert!((fr.mean(t + 1)[0] - m).abs() < 1e-10, "mean at {}", t + 1);
            assert!((fr.cov(t + 1).dense()[(0, 0)] - c).abs() < 1e-10, "cov at {}", t + 1);
        }
    }

    #[test]
    fn test_all_missing_step_equals_prediction() {
        let y = ObservationMatrix::univariate(&[Some(1.0), None]).expect("valid");
        let model = local_level(0.5, 0.2);
        let fr = KalmanFilter::new(&model).filter(&y).expect("filter");
        let step = &fr.steps()[1];
        assert_eq!(step.m, step.a);
        assert_eq!(step.c, step.r);
        assert!(step.observed.is_empty());
    }

    #[test]
    fn test_log_likelihood_scalar() {
        let ys = [Some(0.3), Some(-0.2)];
        let y = ObservationMatrix::univariate(&ys).expect("valid");
        let model = local_level(1.0, 0.5);
        let fr = KalmanFilter::new(&model).filter(&y).expect("filter");

        let mut ll = 0.0;
        let mut m = 0.0;
        let mut c: f64 = 10.0;
        for obs in ys.iter().flatten() {
            let r = c + 0.5;
            let q = r + 1.0;
            let e = obs - m;
            ll += -0.5 * ((2.0 * std::f64::consts::PI).ln() + q.ln() + e * e / q);
            m += r / q * e;
            c = r - r * r / q;
        }
        assert!((fr.log_likelihood() - ll).abs() < 1e-10);
    }

    #[test]
    fn test_singular_innovation_is_numerical_failure() {
        // two noiseless sensors reading the same scalar state
        let model = StateSpaceModel::new(
            DMatrix::from_row_slice(2, 1, &[1.0, 1.0]),
            DMatrix::identity(1, 1),
            DMatrix::zeros(2, 2),
            DMatrix::identity(1, 1),
            DVector::zeros(1),
            DMatrix::identity(1, 1),
        )
        .expect("valid model");
        let y = ObservationMatrix::from_rows(vec![vec![Some(1.0), Some(1.0)]]).expect("valid");
        let err = KalmanFilter::new(&model).filter(&y).unwrap_err();
        assert!(matches!(err, DlmError::NumericalFailure { timestep: 1, .. }), "{err:?}");
        assert!(err.is_numerical());
    }

    #[test]
    fn test_wrong_series_count() {
        let model = local_level(1.0, 1.0);
        let y = ObservationMatrix::from_rows(vec![vec![Some(1.0), Some(2.0)]]).expect("valid");
        assert!(matches!(
            KalmanFilter::new(&model).filter(&y),
            Err(DlmError::InvalidObservations(_))
        ));
    }

    #[test]
    fn test_forecast_matches_scalar() {
        let ys = [Some(1.0), None, Some(3.0)];
        let y = ObservationMatrix::univariate(&ys).expect("valid");
        let model = local_level(0.5, 0.2);
        let fr = KalmanFilter::new(&model).filter(&y).expect("filter");
        let (mean, var) = fr.forecast(0).expect("series 0");
        assert!(fr.forecast(1).is_none());
        let reference = scalar_filter(&ys, 0.5, 0.2, 10.0);
        assert!((mean[1] - reference[0].0).abs() < 1e-10);
        assert!((var[1] - (reference[0].1 + 0.2 + 0.5)).abs() < 1e-10);
        assert!(var[2] > var[1]);
    }
}
