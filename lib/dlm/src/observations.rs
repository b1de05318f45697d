//! Observation matrix with explicit missing cells
//!
//! One row per time step, one column per series. A cell is `None` when the
//! sensor produced no reading for that step.

use crate::error::DlmError;

/// Convert a raw reading to an observation cell, mapping NaN to missing.
pub fn cell_from_f64(value: f64) -> Option<f64> {
    if value.is_nan() { None } else { Some(value) }
}

/// n × p matrix of optional readings, stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationMatrix {
    n: usize,
    p: usize,
    cells: Vec<Option<f64>>,
}

impl ObservationMatrix {
    /// Build from time-step rows.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no rows, rows are empty or ragged, or any
    /// present value is infinite.
    pub fn from_rows(rows: Vec<Vec<Option<f64>>>) -> Result<Self, DlmError> {
        let n = rows.len();
        if n == 0 {
            return Err(DlmError::InvalidObservations(
                "at least one time step is required".to_string(),
            ));
        }
        let p = rows[0].len();
        if p == 0 {
            return Err(DlmError::InvalidObservations(
                "at least one series is required".to_string(),
            ));
        }
        let mut cells = Vec::with_capacity(n * p);
        for (t, row) in rows.into_iter().enumerate() {
            if row.len() != p {
                return Err(DlmError::InvalidObservations(format!(
                    "row {} has {} series, expected {}",
                    t,
                    row.len(),
                    p
                )));
            }
            for (i, cell) in row.into_iter().enumerate() {
                if let Some(v) = cell {
                    if !v.is_finite() {
                        return Err(DlmError::InvalidObservations(format!(
                            "value at row {}, series {} is not finite ({})",
                            t, i, v
                        )));
                    }
                }
                cells.push(cell);
            }
        }
        Ok(Self { n, p, cells })
    }

    /// Build from per-series columns of equal length.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ObservationMatrix::from_rows`].
    pub fn from_columns(columns: Vec<Vec<Option<f64>>>) -> Result<Self, DlmError> {
        let Some(first) = columns.first() else {
            return Err(DlmError::InvalidObservations(
                "at least one series is required".to_string(),
            ));
        };
        let n = first.len();
        if let Some(bad) = columns.iter().position(|c| c.len() != n) {
            return Err(DlmError::InvalidObservations(format!(
                "series {} has {} time steps, expected {}",
                bad,
                columns[bad].len(),
                n
            )));
        }
        let rows = (0..n)
            .map(|t| columns.iter().map(|c| c[t]).collect())
            .collect();
        Self::from_rows(rows)
    }

    /// Build from raw rows where NaN marks a missing reading.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ObservationMatrix::from_rows`].
    pub fn from_f64_rows(rows: &[Vec<f64>]) -> Result<Self, DlmError> {
        Self::from_rows(
            rows.iter()
                .map(|row| row.iter().copied().map(cell_from_f64).collect())
                .collect(),
        )
    }

    /// Single-series convenience constructor.
    ///
    /// # Errors
    ///
    /// Same conditions as [`ObservationMatrix::from_rows`].
    pub fn univariate(values: &[Option<f64>]) -> Result<Self, DlmError> {
        Self::from_columns(vec![values.to_vec()])
    }

    /// Number of time steps n.
    pub fn n_steps(&self) -> usize {
        self.n
    }

    /// Number of series p.
    pub fn n_series(&self) -> usize {
        self.p
    }

    /// Cell at 0-based row `t`, series `i`.
    pub fn get(&self, t: usize, i: usize) -> Option<f64> {
        self.cells[t * self.p + i]
    }

    /// All cells of 0-based row `t`.
    pub fn row(&self, t: usize) -> &[Option<f64>] {
        &self.cells[t * self.p..(t + 1) * self.p]
    }

    /// One series as a column.
    pub fn column(&self, i: usize) -> Vec<Option<f64>> {
        (0..self.n).map(|t| self.get(t, i)).collect()
    }

    /// Indices of the series observed at row `t`.
    pub fn observed_indices(&self, t: usize) -> Vec<usize> {
        self.row(t)
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.map(|_| i))
            .collect()
    }

    /// True when every series is observed at row `t`.
    pub fn is_complete(&self, t: usize) -> bool {
        self.row(t).iter().all(Option::is_some)
    }

    /// Number of observed cells in series `i`.
    pub fn observed_count(&self, i: usize) -> usize {
        (0..self.n).filter(|&t| self.get(t, i).is_some()).count()
    }
}
