//! Statistical distributions module
//!
//! Conjugate variance distributions (inverse-gamma, inverse-Wishart) used by
//! the Gibbs sampler, and the normal quantile used for interval reporting.

use std::f64;

use nalgebra::DMatrix;
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, Gamma, StandardNormal};

use crate::error::DlmError;

/// Error function class
#[derive(Debug, Clone, Copy, Default)]
pub struct Erf;

impl Erf {
    const COF: [f64; 28] = [
        -1.302_653_719_781_709_4,
        0.641_969_792_356_490_3,
        0.019_476_473_204_185_836,
        -0.009_561_514_786_808_63,
        -9.465_953_444_820_36e-4,
        3.668_394_978_527_61e-4,
        4.252_332_480_690_7e-5,
        -2.027_857_811_253_4e-5,
        -1.624_290_004_647e-6,
        1.303_655_835_580e-6,
        1.562_644_172_2e-8,
        -8.523_809_591_5e-8,
        6.529_054_439e-9,
        5.059_343_495e-9,
        -9.913_641_56e-10,
        -2.273_651_22e-10,
        9.646_791_1e-11,
        2.394_038e-12,
        -6.886_027e-12,
        8.944_87e-13,
        3.130_92e-13,
        -1.127_08e-13,
        3.81e-16,
        7.106e-15,
        -1.523e-15,
        -9.4e-17,
        1.21e-16,
        -2.8e-17,
    ];

    /// Error function
    pub fn erf(&self, x: f64) -> f64 {
        if x >= 0.0 {
            1.0 - self.erfccheb(x)
        } else {
            self.erfccheb(-x) - 1.0
        }
    }

    /// Complementary error function
    pub fn erfc(&self, x: f64) -> f64 {
        if x >= 0.0 {
            self.erfccheb(x)
        } else {
            2.0 - self.erfccheb(-x)
        }
    }

    /// Chebyshev approximation for erfc, `z ≥ 0`.
    fn erfccheb(&self, z: f64) -> f64 {
        let mut d = 0.0;
        let mut dd = 0.0;
        let t = 2.0 / (2.0 + z);
        let ty = 4.0 * t - 2.0;
        for c in Self::COF[1..].iter().rev() {
            let tmp = d;
            d = ty * d - dd + c;
            dd = tmp;
        }
        t * (-z * z + 0.5 * (Self::COF[0] + ty * d) - dd).exp()
    }

    /// Inverse complementary error function
    pub fn inverfc(&self, p: f64) -> f64 {
        if p >= 2.0 {
            return -100.0;
        }
        if p <= 0.0 {
            return 100.0;
        }
        let pp = if p < 1.0 { p } else { 2.0 - p };
        let t = (-2.0 * (pp / 2.0).ln()).sqrt();
        let mut x = -f64::consts::FRAC_1_SQRT_2
            * ((2.30753 + t * 0.27061) / (1.0 + t * (0.99229 + t * 0.04481)) - t);

        for _ in 0..2 {
            let err = self.erfc(x) - pp;
            x += err / (f64::consts::FRAC_2_SQRT_PI * (-x * x).exp() - x * err);
        }

        if p < 1.0 { x } else { -x }
    }
}

/// Normal distribution
#[derive(Debug, Clone, Copy)]
pub struct Normal {
    mu: f64,
    sigma: f64,
}

impl Normal {
    pub fn new(mu: f64, sigma: f64) -> Result<Self, DlmError> {
        if !(sigma > 0.0) || !sigma.is_finite() || !mu.is_finite() {
            return Err(DlmError::InvalidConfig(format!(
                "normal distribution needs finite mu and sigma > 0, got ({}, {})",
                mu, sigma
            )));
        }
        Ok(Self { mu, sigma })
    }

    pub fn standard() -> Self {
        Self { mu: 0.0, sigma: 1.0 }
    }

    /// Cumulative distribution function
    pub fn cdf(&self, x: f64) -> f64 {
        0.5 * Erf.erfc(-f64::consts::FRAC_1_SQRT_2 * (x - self.mu) / self.sigma)
    }

    /// Inverse cumulative distribution function, `p` in (0, 1).
    pub fn invcdf(&self, p: f64) -> Result<f64, DlmError> {
        if !(p > 0.0 && p < 1.0) {
            return Err(DlmError::InvalidConfig(format!(
                "probability must be in (0, 1), got {}",
                p
            )));
        }
        Ok(-f64::consts::SQRT_2 * self.sigma * Erf.inverfc(2.0 * p) + self.mu)
    }
}

/// Symmetric normal interval `mean ± z·sd` at the given two-sided confidence.
///
/// # Errors
///
/// Returns an error if the variance is negative or `confidence` is outside (0, 1).
pub fn prediction_interval(
    mean: f64,
    variance: f64,
    confidence: f64,
) -> Result<(f64, f64), DlmError> {
    if !(variance >= 0.0) {
        return Err(DlmError::InvalidConfig(format!(
            "variance must be non-negative, got {}",
            variance
        )));
    }
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(DlmError::InvalidConfig(format!(
            "confidence must be in (0, 1), got {}",
            confidence
        )));
    }
    // two-sided: the (1 + confidence) / 2 quantile
    let z = Normal::standard().invcdf((1.0 + confidence) / 2.0)?;
    let half = z * variance.sqrt();
    Ok((mean - half, mean + half))
}

/// Inverse-gamma distribution in shape/rate form: `1/X` with `X ~ Gamma(shape, 1/rate)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverseGamma {
    shape: f64,
    rate: f64,
}

impl InverseGamma {
    pub fn new(shape: f64, rate: f64) -> Result<Self, DlmError> {
        if !(shape > 0.0 && shape.is_finite() && rate > 0.0 && rate.is_finite()) {
            return Err(DlmError::InvalidPrior(format!(
                "inverse-gamma needs finite shape > 0 and rate > 0, got ({}, {})",
                shape, rate
            )));
        }
        Ok(Self { shape, rate })
    }

    pub fn shape(&self) -> f64 {
        self.shape
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Conjugate update after `n` residuals with sum of squares `ss`.
    pub fn posterior(&self, n: usize, ss: f64) -> Result<Self, DlmError> {
        Self::new(self.shape + 0.5 * n as f64, self.rate + 0.5 * ss)
    }

    /// Mean, defined for shape > 1.
    pub fn mean(&self) -> Option<f64> {
        (self.shape > 1.0).then(|| self.rate / (self.shape - 1.0))
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<f64, DlmError> {
        let gamma = Gamma::new(self.shape, 1.0 / self.rate)
            .map_err(|e| DlmError::InvalidPrior(format!("gamma: {}", e)))?;
        Ok(1.0 / gamma.sample(rng))
    }
}

/// Inverse-Wishart distribution `IW(dof, scale)` over p × p SPD matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct InverseWishart {
    dof: f64,
    scale: DMatrix<f64>,
}

impl InverseWishart {
    pub fn new(dof: f64, scale: DMatrix<f64>) -> Result<Self, DlmError> {
        let p = scale.nrows();
        if p == 0 || scale.ncols() != p {
            return Err(DlmError::InvalidPrior(format!(
                "inverse-Wishart scale must be square and non-empty, got {}x{}",
                scale.nrows(),
                scale.ncols()
            )));
        }
        if !dof.is_finite() || dof <= (p as f64) - 1.0 {
            return Err(DlmError::InvalidPrior(format!(
                "inverse-Wishart dof must exceed {}, got {}",
                p - 1,
                dof
            )));
        }
        if scale.iter().any(|x| !x.is_finite())
            || (&scale - scale.transpose()).amax() > 1e-9 * scale.amax().max(1.0)
            || scale.clone().cholesky().is_none()
        {
            return Err(DlmError::InvalidPrior(
                "inverse-Wishart scale must be symmetric positive definite".to_string(),
            ));
        }
        Ok(Self { dof, scale })
    }

    pub fn dim(&self) -> usize {
        self.scale.nrows()
    }

    pub fn dof(&self) -> f64 {
        self.dof
    }

    pub fn scale(&self) -> &DMatrix<f64> {
        &self.scale
    }

    /// Conjugate update after `n` residual vectors with cross-product `sse`.
    pub fn posterior(&self, n: usize, sse: &DMatrix<f64>) -> Result<Self, DlmError> {
        Self::new(self.dof + n as f64, &self.scale + sse)
    }

    /// Mean, defined for dof > p + 1.
    pub fn mean(&self) -> Option<DMatrix<f64>> {
        let denom = self.dof - self.dim() as f64 - 1.0;
        (denom > 0.0).then(|| &self.scale / denom)
    }

    /// Bartlett draw of `W ~ Wishart(dof, scale⁻¹)`, returned as `W⁻¹`.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DMatrix<f64>, DlmError> {
        let p = self.dim();
        let precision = self
            .scale
            .clone()
            .cholesky()
            .map(|c| c.inverse())
            .ok_or_else(|| DlmError::InvalidPrior("scale is not positive definite".to_string()))?;
        let l = precision
            .cholesky()
            .ok_or_else(|| DlmError::InvalidPrior("scale inverse is not positive definite".to_string()))?
            .unpack();

        let mut a = DMatrix::zeros(p, p);
        for i in 0..p {
            let chi = ChiSquared::new(self.dof - i as f64)
                .map_err(|e| DlmError::InvalidPrior(format!("chi-squared: {}", e)))?;
            a[(i, i)] = chi.sample(rng).sqrt();
            for j in 0..i {
                a[(i, j)] = rng.sample::<f64, _>(StandardNormal);
            }
        }
        let la = l * a;
        let wishart = &la * la.transpose();
        wishart
            .cholesky()
            .map(|c| c.inverse())
            .ok_or(DlmError::NonPositiveDefiniteDraw { block: "inverse-Wishart" })
    }
}
