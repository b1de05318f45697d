//! Gibbs sampler over the noise covariances
//!
//! One iteration is build → filter → backward-sample → variance update.
//! Chains are sequential internally and independent of each other, so they
//! run on rayon's pool with one `StdRng` each and are merged after all of
//! them finish.

use derive_builder::Builder;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, trace, warn};

use crate::error::DlmError;
use crate::ffbs::BackwardSampler;
use crate::filter::KalmanFilter;
use crate::models::builder::ModelBuilder;
use crate::observations::ObservationMatrix;
use crate::variance::{Priors, VarianceSampler, Variances};

/// Sampler settings.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct GibbsConfig {
    #[builder(default)]
    pub priors: Priors,
    /// Iterations per chain.
    #[builder(default = "1000")]
    pub iterations: usize,
    #[builder(default = "1")]
    pub chains: usize,
    /// Base seed; chain `c` uses `seed + c` unless `chain_seeds` is set.
    #[builder(default)]
    pub seed: u64,
    #[builder(setter(into, strip_option), default)]
    pub chain_seeds: Option<Vec<u64>>,
    /// Starting parameter vector per chain.
    #[builder(setter(into, strip_option), default)]
    pub initial_thetas: Option<Vec<Vec<f64>>>,
}

impl GibbsConfig {
    pub fn builder() -> GibbsConfigBuilder {
        GibbsConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), DlmError> {
        if self.iterations == 0 {
            return Err(DlmError::InvalidConfig("iterations must be > 0".to_string()));
        }
        if self.chains == 0 {
            return Err(DlmError::InvalidConfig("chains must be > 0".to_string()));
        }
        if let Some(seeds) = &self.chain_seeds {
            if seeds.len() != self.chains {
                return Err(DlmError::InvalidConfig(format!(
                    "{} chain seeds given for {} chains",
                    seeds.len(),
                    self.chains
                )));
            }
        }
        if let Some(thetas) = &self.initial_thetas {
            if thetas.len() != self.chains {
                return Err(DlmError::InvalidConfig(format!(
                    "{} starting vectors given for {} chains",
                    thetas.len(),
                    self.chains
                )));
            }
        }
        Ok(())
    }

    /// Seed of chain `chain_id`.
    pub fn chain_seed(&self, chain_id: usize) -> u64 {
        match &self.chain_seeds {
            Some(seeds) => seeds[chain_id],
            None => self.seed.wrapping_add(chain_id as u64),
        }
    }
}

/// (V, W) drawn at one iteration of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRecord {
    pub chain_id: usize,
    /// 1-based iteration number.
    pub iteration: usize,
    pub v: DMatrix<f64>,
    pub w: DMatrix<f64>,
}

impl ChainRecord {
    pub fn v_diagonal(&self) -> Vec<f64> {
        self.v.diagonal().iter().copied().collect()
    }

    pub fn w_diagonal(&self) -> Vec<f64> {
        self.w.diagonal().iter().copied().collect()
    }
}

/// Why and where a chain stopped early.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainFailure {
    pub chain_id: usize,
    /// Iteration that failed; earlier iterations are kept.
    pub iteration: usize,
    pub error: DlmError,
}

impl std::fmt::Display for ChainFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "chain {} failed at iteration {}: {}",
            self.chain_id, self.iteration, self.error
        )
    }
}

/// Output of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainRun {
    pub chain_id: usize,
    pub seed: u64,
    pub records: Vec<ChainRecord>,
    pub failure: Option<ChainFailure>,
}

impl ChainRun {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

/// Merged output of all chains, ordered by chain id.
#[derive(Debug, Clone, PartialEq)]
pub struct GibbsOutput {
    pub runs: Vec<ChainRun>,
}

impl GibbsOutput {
    /// Every record, chain after chain.
    pub fn records(&self) -> impl Iterator<Item = &ChainRecord> {
        self.runs.iter().flat_map(|r| r.records.iter())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChainFailure> {
        self.runs.iter().filter_map(|r| r.failure.as_ref())
    }

    pub fn is_complete(&self) -> bool {
        self.runs.iter().all(ChainRun::is_complete)
    }

    /// One scalar per record, per chain, after dropping `burn_in` iterations
    /// and keeping every `thin`-th one.
    pub fn component<F>(&self, burn_in: usize, thin: usize, f: F) -> Vec<Vec<f64>>
    where
        F: Fn(&ChainRecord) -> f64,
    {
        self.runs
            .iter()
            .map(|run| {
                let values: Vec<f64> = run.records.iter().map(&f).collect();
                crate::summary::discard_burn_in(&values, burn_in, thin)
            })
            .collect()
    }
}

/// Runs Gibbs chains for one structure and one observation matrix.
#[derive(Debug)]
pub struct GibbsDriver<'a> {
    builder: &'a ModelBuilder,
    y: &'a ObservationMatrix,
    sampler: VarianceSampler,
    config: GibbsConfig,
}

impl<'a> GibbsDriver<'a> {
    /// Validate everything that can be checked before a recursion runs.
    pub fn new(
        builder: &'a ModelBuilder,
        y: &'a ObservationMatrix,
        config: GibbsConfig,
    ) -> Result<Self, DlmError> {
        config.validate()?;
        let structure = builder.structure();
        if y.n_series() != structure.n_series() {
            return Err(DlmError::InvalidObservations(format!(
                "model structure has {} series, observations have {}",
                structure.n_series(),
                y.n_series()
            )));
        }
        if let Some(thetas) = &config.initial_thetas {
            for theta in thetas {
                builder.unpack(theta)?;
            }
        }
        let sampler = VarianceSampler::new(
            config.priors.clone(),
            structure.n_series(),
            structure.n_state(),
        )?;
        Ok(Self {
            builder,
            y,
            sampler,
            config,
        })
    }

    pub fn config(&self) -> &GibbsConfig {
        &self.config
    }

    /// Run every chain. Chains without their own starting vector use `theta0`.
    ///
    /// # Errors
    ///
    /// Only configuration errors are returned; numerical failures are
    /// recorded on the affected chain.
    pub fn run(&self, theta0: &[f64]) -> Result<GibbsOutput, DlmError> {
        self.builder.unpack(theta0)?;
        let runs: Vec<ChainRun> = (0..self.config.chains)
            .into_par_iter()
            .map(|chain_id| {
                let theta = match &self.config.initial_thetas {
                    Some(thetas) => thetas[chain_id].as_slice(),
                    None => theta0,
                };
                let seed = self.config.chain_seed(chain_id);
                let mut rng = StdRng::seed_from_u64(seed);
                self.run_chain(chain_id, seed, theta, &mut rng)
            })
            .collect();
        Ok(GibbsOutput { runs })
    }

    /// Run one chain with an explicit random source.
    #[tracing::instrument(skip(self, theta0, rng), fields(iterations = self.config.iterations))]
    pub fn run_chain<R: Rng + ?Sized>(
        &self,
        chain_id: usize,
        seed: u64,
        theta0: &[f64],
        rng: &mut R,
    ) -> ChainRun {
        debug!("chain started");
        let mut records = Vec::with_capacity(self.config.iterations);
        let mut failure = None;

        let mut current = match self.builder.unpack(theta0) {
            Ok((v, w)) => Variances {
                v: DMatrix::from_diagonal(&v),
                w: DMatrix::from_diagonal(&w),
            },
            Err(error) => {
                return ChainRun {
                    chain_id,
                    seed,
                    records,
                    failure: Some(ChainFailure {
                        chain_id,
                        iteration: 0,
                        error,
                    }),
                };
            }
        };

        for iteration in 1..=self.config.iterations {
            match self.step(&current, rng) {
                Ok(next) => {
                    trace!(iteration, "iteration complete");
                    records.push(ChainRecord {
                        chain_id,
                        iteration,
                        v: next.v.clone(),
                        w: next.w.clone(),
                    });
                    current = next;
                }
                Err(error) => {
                    warn!(iteration, %error, "chain aborted");
                    failure = Some(ChainFailure {
                        chain_id,
                        iteration,
                        error,
                    });
                    break;
                }
            }
        }

        debug!(records = records.len(), "chain finished");
        ChainRun {
            chain_id,
            seed,
            records,
            failure,
        }
    }

    /// One Gibbs sweep from the current (V, W).
    fn step<R: Rng + ?Sized>(&self, current: &Variances, rng: &mut R) -> Result<Variances, DlmError> {
        let model = self
            .builder
            .with_variances(current.v.clone(), current.w.clone())?;
        let fr = KalmanFilter::new(&model).filter(self.y)?;
        let traj = BackwardSampler::new(&model).sample(&fr, rng)?;
        self.sampler.sample(self.y, &traj, &model, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::structure::ModelStructure;

    fn local_level_data() -> ObservationMatrix {
        let ys: Vec<Option<f64>> = (0..30)
            .map(|t| if t % 7 == 3 { None } else { Some((t as f64 * 0.3).sin()) })
            .collect();
        ObservationMatrix::univariate(&ys).expect("valid")
    }

    #[test]
    fn test_config_defaults() {
        let config = GibbsConfig::builder().build().expect("defaults");
        assert_eq!(config.iterations, 1000);
        assert_eq!(config.chains, 1);
        assert_eq!(config.chain_seed(3), 3);
        assert_eq!(config.priors, Priors::default());
    }

    #[test]
    fn test_config_validation() {
        let builder = ModelBuilder::new(ModelStructure::local_level(1)).expect("valid");
        let y = local_level_data();

        let zero = GibbsConfig::builder().iterations(0usize).build().expect("config");
        assert!(matches!(
            GibbsDriver::new(&builder, &y, zero),
            Err(DlmError::InvalidConfig(_))
        ));

        let seeds = GibbsConfig::builder()
            .chains(2usize)
            .chain_seeds(vec![1u64])
            .build()
            .expect("config");
        assert!(GibbsDriver::new(&builder, &y, seeds).is_err());

        let bad_theta = GibbsConfig::builder()
            .initial_thetas(vec![vec![1.0, -1.0]])
            .build()
            .expect("config");
        assert!(matches!(
            GibbsDriver::new(&builder, &y, bad_theta),
            Err(DlmError::NegativeVariance { index: 1, .. })
        ));
    }

    #[test]
    fn test_run_records_every_iteration() {
        let builder = ModelBuilder::new(ModelStructure::local_level(1)).expect("valid");
        let y = local_level_data();
        let config = GibbsConfig::builder()
            .iterations(20usize)
            .chains(3usize)
            .seed(7u64)
            .build()
            .expect("config");
        let driver = GibbsDriver::new(&builder, &y, config).expect("driver");
        let out = driver.run(&[1.0, 1.0]).expect("run");

        assert!(out.is_complete());
        assert_eq!(out.runs.len(), 3);
        assert_eq!(out.records().count(), 60);
        for (c, run) in out.runs.iter().enumerate() {
            assert_eq!(run.chain_id, c);
            assert_eq!(run.seed, 7 + c as u64);
            let iterations: Vec<usize> = run.records.iter().map(|r| r.iteration).collect();
            assert_eq!(iterations, (1..=20).collect::<Vec<_>>());
        }
        assert!(out.records().all(|r| r.v[(0, 0)] > 0.0 && r.w[(0, 0)] > 0.0));
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let builder = ModelBuilder::new(ModelStructure::local_level(1)).expect("valid");
        let y = local_level_data();
        let config = GibbsConfig::builder()
            .iterations(10usize)
            .chains(2usize)
            .chain_seeds(vec![5u64, 5u64])
            .build()
            .expect("config");
        let driver = GibbsDriver::new(&builder, &y, config).expect("driver");
        let out = driver.run(&[1.0, 1.0]).expect("run");
        let a: Vec<_> = out.runs[0].records.iter().map(|r| r.v.clone()).collect();
        let b: Vec<_> = out.runs[1].records.iter().map(|r| r.v.clone()).collect();
        assert_eq!(a, b);
        assert_eq!(out.runs[1].records[0].chain_id, 1);
    }

    #[test]
    fn test_invalid_start_fails_before_first_iteration() {
        let builder = ModelBuilder::new(ModelStructure::local_level(1)).expect("valid");
        let y = local_level_data();
        let config = GibbsConfig::builder().iterations(5usize).build().expect("config");
        let driver = GibbsDriver::new(&builder, &y, config).expect("driver");
        let mut rng = StdRng::seed_from_u64(0);
        let run = driver.run_chain(0, 0, &[1.0], &mut rng);
        assert!(run.records.is_empty());
        let failure = run.failure.expect("failure recorded");
        assert_eq!(failure.iteration, 0);
        assert!(failure.error.is_configuration());
        assert!(driver.run(&[1.0]).is_err());
    }

    #[test]
    fn test_chain_failure_display() {
        let failure = ChainFailure {
            chain_id: 2,
            iteration: 14,
            error: DlmError::numerical(9, "innovation covariance is singular"),
        };
        assert_eq!(
            failure.to_string(),
            "chain 2 failed at iteration 14: numerical failure at time step 9: innovation covariance is singular"
        );
    }
}
