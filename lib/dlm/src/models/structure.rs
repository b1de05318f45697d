//! Per-series component layout
//!
//! Each series carries a polynomial trend block and an optional trigonometric
//! seasonal block. Series are stacked block-diagonally; the parameter vector
//! lists, for each series in turn, its observation variance followed by one
//! state variance per state dimension.

use std::f64::consts::PI;

use nalgebra::DMatrix;

use crate::error::DlmError;
use crate::models::DIFFUSE_VARIANCE;

/// Component layout of a single observed series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesStructure {
    /// 1 for a local level, 2 for a local linear trend.
    pub trend_order: usize,
    /// Seasonal period in time steps. Ignored when `harmonics == 0`.
    pub period: usize,
    /// Number of Fourier harmonics in the seasonal block.
    pub harmonics: usize,
}

impl SeriesStructure {
    /// Random-walk level, no season.
    pub fn local_level() -> Self {
        Self {
            trend_order: 1,
            period: 0,
            harmonics: 0,
        }
    }

    /// Level plus slope, no season.
    pub fn local_linear_trend() -> Self {
        Self {
            trend_order: 2,
            period: 0,
            harmonics: 0,
        }
    }

    /// Add a trigonometric season.
    pub fn with_seasonal(mut self, period: usize, harmonics: usize) -> Self {
        self.period = period;
        self.harmonics = harmonics;
        self
    }

    /// Check the trend order and that the harmonics fit in the period.
    pub fn validate(&self) -> Result<(), DlmError> {
        if !(1..=2).contains(&self.trend_order) {
            return Err(DlmError::InvalidModel(format!(
                "trend order must be 1 or 2, got {}",
                self.trend_order
            )));
        }
        if self.harmonics > 0 && (self.period < 2 || 2 * self.harmonics > self.period) {
            return Err(DlmError::InvalidModel(format!(
                "{} harmonics do not fit a period of {}",
                self.harmonics, self.period
            )));
        }
        Ok(())
    }

    fn has_nyquist(&self) -> bool {
        self.harmonics > 0 && 2 * self.harmonics == self.period
    }

    /// Number of seasonal state dimensions.
    pub fn seasonal_states(&self) -> usize {
        if self.has_nyquist() {
            2 * self.harmonics - 1
        } else {
            2 * self.harmonics
        }
    }

    /// State dimension d_i.
    pub fn state_dim(&self) -> usize {
        self.trend_order + self.seasonal_states()
    }

    /// Parameters per series: one observation variance plus one per state.
    pub fn n_params(&self) -> usize {
        1 + self.state_dim()
    }

    /// Transition block and observation row for this series.
    fn blocks(&self) -> (DMatrix<f64>, Vec<f64>) {
        let d = self.state_dim();
        let mut g = DMatrix::zeros(d, d);
        let mut f = vec![0.0; d];

        g[(0, 0)] = 1.0;
        f[0] = 1.0;
        if self.trend_order == 2 {
            g[(0, 1)] = 1.0;
            g[(1, 1)] = 1.0;
        }

        let mut at = self.trend_order;
        for j in 1..=self.harmonics {
            if 2 * j == self.period {
                g[(at, at)] = -1.0;
                f[at] = 1.0;
                at += 1;
                continue;
            }
            let omega = 2.0 * PI * j as f64 / self.period as f64;
            let (s, c) = omega.sin_cos();
            g[(at, at)] = c;
            g[(at, at + 1)] = s;
            g[(at + 1, at)] = -s;
            g[(at + 1, at + 1)] = c;
            f[at] = 1.0;
            at += 2;
        }
        (g, f)
    }
}

/// Block-diagonal layout of all series plus the initial-state prior.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelStructure {
    series: Vec<SeriesStructure>,
    initial_variance: f64,
}

impl ModelStructure {
    pub fn new(series: Vec<SeriesStructure>) -> Result<Self, DlmError> {
        if series.is_empty() {
            return Err(DlmError::InvalidModel(
                "at least one series is required".to_string(),
            ));
        }
        for s in &series {
            s.validate()?;
        }
        Ok(Self {
            series,
            initial_variance: DIFFUSE_VARIANCE,
        })
    }

    /// Two series, each a local linear trend with a period-6 season of three
    /// harmonics: 16 parameters.
    pub fn environmental() -> Self {
        let s = SeriesStructure::local_linear_trend().with_seasonal(6, 3);
        Self {
            series: vec![s, s],
            initial_variance: DIFFUSE_VARIANCE,
        }
    }

    /// `p` independent random-walk levels: 2p parameters.
    ///
    /// `p == 0` gives an empty structure, which [`ModelBuilder::new`] rejects.
    ///
    /// [`ModelBuilder::new`]: crate::models::builder::ModelBuilder::new
    pub fn local_level(p: usize) -> Self {
        Self {
            series: vec![SeriesStructure::local_level(); p],
            initial_variance: DIFFUSE_VARIANCE,
        }
    }

    /// Set the prior variance of every initial state component.
    pub fn with_initial_variance(mut self, variance: f64) -> Self {
        self.initial_variance = variance;
        self
    }

    pub fn initial_variance(&self) -> f64 {
        self.initial_variance
    }

    pub fn series(&self) -> &[SeriesStructure] {
        &self.series
    }

    pub fn n_series(&self) -> usize {
        self.series.len()
    }

    /// Total state dimension d.
    pub fn n_state(&self) -> usize {
        self.series.iter().map(SeriesStructure::state_dim).sum()
    }

    /// Length k of the parameter vector.
    pub fn n_params(&self) -> usize {
        self.series.iter().map(SeriesStructure::n_params).sum()
    }

    /// First state index of each series.
    pub fn state_offsets(&self) -> Vec<usize> {
        self.series
            .iter()
            .scan(0, |acc, s| {
                let at = *acc;
                *acc += s.state_dim();
                Some(at)
            })
            .collect()
    }

    /// Position of series `i`'s observation variance in the parameter vector.
    pub fn obs_variance_index(&self, i: usize) -> usize {
        self.series[..i].iter().map(SeriesStructure::n_params).sum()
    }

    /// Parameter-vector positions of the state variances, in state order.
    pub fn state_variance_indices(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.n_state());
        for (i, s) in self.series.iter().enumerate() {
            let base = self.obs_variance_index(i) + 1;
            out.extend(base..base + s.state_dim());
        }
        out
    }

    /// Series that owns state dimension `j`.
    pub fn series_of_state(&self, j: usize) -> Option<usize> {
        let offsets = self.state_offsets();
        self.series
            .iter()
            .zip(offsets)
            .position(|(s, o)| j >= o && j < o + s.state_dim())
    }

    /// F (p × d) and G (d × d).
    pub(crate) fn system_matrices(&self) -> (DMatrix<f64>, DMatrix<f64>) {
        let p = self.n_series();
        let d = self.n_state();
        let mut f = DMatrix::zeros(p, d);
        let mut g = DMatrix::zeros(d, d);
        for ((i, s), o) in self.series.iter().enumerate().zip(self.state_offsets()) {
            let (gb, fb) = s.blocks();
            let di = s.state_dim();
            g.view_mut((o, o), (di, di)).copy_from(&gb);
            for (j, v) in fb.into_iter().enumerate() {
                f[(i, o + j)] = v;
            }
        }
        (f, g)
    }
}
