//! Posterior summaries of chain output

use crate::error::DlmError;

/// Drop the first `burn_in` draws and keep every `thin`-th of the rest.
/// A `thin` of 0 is treated as 1.
pub fn discard_burn_in(draws: &[f64], burn_in: usize, thin: usize) -> Vec<f64> {
    draws
        .iter()
        .skip(burn_in)
        .step_by(thin.max(1))
        .copied()
        .collect()
}

/// Empirical quantile with linear interpolation between order statistics.
pub fn quantile(draws: &[f64], q: f64) -> Option<f64> {
    if draws.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = draws.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

/// Mean and equal-tailed credible interval of one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosteriorSummary {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub draws: usize,
}

impl PosteriorSummary {
    pub fn covers(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }
}

pub fn summarize(draws: &[f64], confidence: f64) -> Result<PosteriorSummary, DlmError> {
    if draws.is_empty() {
        return Err(DlmError::InvalidConfig("no draws to summarize".to_string()));
    }
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(DlmError::InvalidConfig(format!(
            "confidence must be in (0, 1), got {}",
            confidence
        )));
    }
    let tail = 0.5 * (1.0 - confidence);
    let mean = draws.iter().sum::<f64>() / draws.len() as f64;
    let lower = quantile(draws, tail).unwrap_or(f64::NAN);
    let upper = quantile(draws, 1.0 - tail).unwrap_or(f64::NAN);
    Ok(PosteriorSummary {
        mean,
        lower,
        upper,
        draws: draws.len(),
    })
}

/// Gelman–Rubin potential scale reduction factor over equal-length chains.
///
/// Returns `None` with fewer than two chains, chains shorter than two draws,
/// unequal lengths, or zero within-chain variance.
pub fn potential_scale_reduction(chains: &[Vec<f64>]) -> Option<f64> {
    let m = chains.len();
    if m < 2 {
        return None;
    }
    let n = chains[0].len();
    if n < 2 || chains.iter().any(|c| c.len() != n) {
        return None;
    }

    let means: Vec<f64> = chains
        .iter()
        .map(|c| c.iter().sum::<f64>() / n as f64)
        .collect();
    let grand = means.iter().sum::<f64>() / m as f64;
    let between = n as f64 / (m - 1) as f64
        * means.iter().map(|x| (x - grand).powi(2)).sum::<f64>();
    let within = chains
        .iter()
        .zip(&means)
        .map(|(c, mu)| c.iter().map(|x| (x - mu).powi(2)).sum::<f64>() / (n - 1) as f64)
        .sum::<f64>()
        / m as f64;
    if !(within > 0.0) {
        return None;
    }
    let pooled = (n - 1) as f64 / n as f64 * within + between / n as f64;
    Some((pooled / within).sqrt())
}
