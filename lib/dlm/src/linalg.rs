//! Factored covariance matrices
//!
//! Covariances travel through the recursions as `U·diag(D)²·Uᵀ` with `U`
//! orthonormal and `D ≥ 0`. New factors are obtained from the singular value
//! decomposition of a "pre-array" `A` with `AᵀA = Σ`, so a propagated
//! covariance can never lose positive semi-definiteness to rounding.

use nalgebra::{DMatrix, DVector, SVD, SymmetricEigen};
use rand::Rng;
use rand_distr::StandardNormal;

/// Relative cutoff on `D` below which a direction counts as zero variance.
const PINV_RTOL: f64 = 1e-8;
/// Relative size of negative eigenvalues accepted as rounding noise.
const PSD_RTOL: f64 = 1e-10;

/// Absolute tolerance for negative eigenvalues of a matrix of `m`'s scale.
pub(crate) fn psd_tolerance(m: &DMatrix<f64>) -> f64 {
    PSD_RTOL * m.amax().max(1.0)
}

/// `0.5 (A + Aᵀ)`.
pub(crate) fn symmetrize(a: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (a + a.transpose())
}

/// Covariance in singular-value square-root form.
#[derive(Debug, Clone, PartialEq)]
pub struct SqrtCov {
    u: DMatrix<f64>,
    d: DVector<f64>,
}

impl SqrtCov {
    /// Diagonal covariance from its variances. Returns `None` on a negative or
    /// non-finite entry.
    pub fn from_variances(variances: &DVector<f64>) -> Option<Self> {
        if variances.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return None;
        }
        let n = variances.len();
        Some(Self {
            u: DMatrix::identity(n, n),
            d: variances.map(f64::sqrt),
        })
    }

    /// Factor `Σ = AᵀA` from the pre-array `A` (any number of rows).
    pub fn from_pre_array(a: DMatrix<f64>) -> Option<Self> {
        let dim = a.ncols();
        if a.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let a = if a.nrows() < dim {
            a.resize_vertically(dim, 0.0)
        } else {
            a
        };
        let svd = SVD::try_new(a, false, true, f64::EPSILON, 0)?;
        let v_t = svd.v_t?;
        Some(Self {
            u: v_t.transpose(),
            d: svd.singular_values,
        })
    }

    /// Factor a symmetric matrix through its eigen-decomposition.
    ///
    /// Eigenvalues in `[-tol, 0)` are treated as rounding noise and clamped to
    /// zero; anything more negative returns `None`.
    pub fn from_symmetric(m: &DMatrix<f64>, tol: f64) -> Option<Self> {
        if m.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let eig = SymmetricEigen::try_new(symmetrize(m), f64::EPSILON, 0)?;
        if eig.eigenvalues.iter().any(|&l| l < -tol) {
            return None;
        }
        Some(Self {
            u: eig.eigenvectors,
            d: eig.eigenvalues.map(|l| l.max(0.0).sqrt()),
        })
    }

    /// State dimension.
    pub fn dim(&self) -> usize {
        self.d.len()
    }

    /// Orthonormal factor `U`.
    pub fn u(&self) -> &DMatrix<f64> {
        &self.u
    }

    /// Square roots of the eigenvalues.
    pub fn d(&self) -> &DVector<f64> {
        &self.d
    }

    /// `L = U·diag(D)`, so that `Σ = L Lᵀ`.
    pub fn root(&self) -> DMatrix<f64> {
        let mut l = self.u.clone();
        for (j, dj) in self.d.iter().enumerate() {
            l.column_mut(j).scale_mut(*dj);
        }
        l
    }

    /// Rows `Lᵀ` for stacking into a pre-array.
    pub fn root_rows(&self) -> DMatrix<f64> {
        self.root().transpose()
    }

    /// Dense covariance `U·diag(D)²·Uᵀ`.
    pub fn dense(&self) -> DMatrix<f64> {
        let l = self.root();
        &l * l.transpose()
    }

    /// Moore–Penrose inverse built from the factors; zero-variance directions
    /// are dropped instead of inverted.
    pub fn pinv(&self) -> DMatrix<f64> {
        let d_max = self.d.iter().copied().fold(0.0, f64::max);
        let cutoff = d_max * PINV_RTOL;
        let inv = self
            .d
            .map(|x| if x > cutoff && x > 0.0 { 1.0 / (x * x) } else { 0.0 });
        let mut scaled = self.u.clone();
        for (j, s) in inv.iter().enumerate() {
            scaled.column_mut(j).scale_mut(*s);
        }
        scaled * self.u.transpose()
    }

    /// Marginal variances (diagonal of the dense covariance).
    pub fn variances(&self) -> DVector<f64> {
        let l = self.root();
        DVector::from_fn(l.nrows(), |i, _| l.row(i).norm_squared())
    }

    /// Draw `L z` with `z ~ N(0, I)`.
    pub fn sample_offset<R: Rng + ?Sized>(&self, rng: &mut R) -> DVector<f64> {
        let z = DVector::from_fn(self.dim(), |_, _| rng.sample::<f64, _>(StandardNormal));
        self.root() * z
    }

    /// True when every factor entry is finite.
    pub fn is_finite(&self) -> bool {
        self.u.iter().chain(self.d.iter()).all(|v| v.is_finite())
    }
}
