use anyhow::{Context, Result, anyhow, bail};
use arrow::array::{ArrayRef, Float64Array, Int64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use nalgebra::DMatrix;
use std::sync::Arc;

use crate::TableFunction;
use crate::funcs::input::{
    BatchBuffer, StructureOptions, parse_count, parse_fields, parse_float, parse_theta,
    reject_positional,
};
use dlm::{ChainRecord, GibbsConfig, GibbsDriver, Priors, VariancePrior};
use envstate_api::arg::{Arg, Args, NamedArgs};

/// Prior on one variance block, assembled from the named arguments.
#[derive(Debug, Clone, Copy)]
struct BlockPrior {
    shape: f64,
    rate: f64,
    dof: Option<f64>,
    scale: f64,
}

impl Default for BlockPrior {
    fn default() -> Self {
        Self {
            shape: 1.0,
            rate: 1.0,
            dof: None,
            scale: 1.0,
        }
    }
}

impl BlockPrior {
    fn prior(&self, dim: usize) -> VariancePrior {
        match self.dof {
            Some(dof) => VariancePrior::InverseWishart {
                dof,
                scale: DMatrix::identity(dim, dim) * self.scale,
            },
            None => VariancePrior::InverseGamma {
                shape: self.shape,
                rate: self.rate,
            },
        }
    }
}

/// Gibbs sampler over the noise variances of the selected fields.
///
/// Emits one row per (chain, iteration) with the diagonal of V as
/// `v_1..v_p` and the diagonal of W as `w_1..w_d`.
#[derive(Debug)]
pub struct Gibbs {
    fields: Vec<String>,
    structure: StructureOptions,
    theta: Option<Vec<f64>>,
    iterations: usize,
    chains: usize,
    seed: u64,
    burn_in: usize,
    thin: usize,
    v_prior: BlockPrior,
    w_prior: BlockPrior,
    buffer: BatchBuffer,
}

impl Gibbs {
    pub fn new(parameters: Option<Args>, named_arguments: NamedArgs) -> Result<Self> {
        reject_positional("gibbs", parameters)?;
        let mut fields = Vec::new();
        let mut structure = StructureOptions::default();
        let mut theta = None;
        let mut iterations = 1000;
        let mut chains = 1;
        let mut seed = 0;
        let mut burn_in = 0;
        let mut thin = 1;
        let mut v_prior = BlockPrior::default();
        let mut w_prior = BlockPrior::default();

        for (name, arg) in named_arguments {
            if structure.accept(&name, &arg)? {
                continue;
            }
            match name.as_str() {
                "fields" => fields.extend(parse_fields(arg)?),
                "theta" => theta = Some(parse_theta(arg)?),
                "iterations" => iterations = parse_count(&name, arg)?,
                "chains" => chains = parse_count(&name, arg)?,
                "seed" => seed = parse_count(&name, arg)? as u64,
                "burn_in" => burn_in = parse_count(&name, arg)?,
                "thin" => thin = parse_count(&name, arg)?,
                "shape_v" => v_prior.shape = parse_float(&name, arg)?,
                "rate_v" => v_prior.rate = parse_float(&name, arg)?,
                "dof_v" => v_prior.dof = Some(parse_float(&name, arg)?),
                "scale_v" => v_prior.scale = parse_float(&name, arg)?,
                "shape_w" => w_prior.shape = parse_float(&name, arg)?,
                "rate_w" => w_prior.rate = parse_float(&name, arg)?,
                "dof_w" => w_prior.dof = Some(parse_float(&name, arg)?),
                "scale_w" => w_prior.scale = parse_float(&name, arg)?,
                _ => return Err(anyhow!("Unknown parameter: {}", name)),
            }
        }

        if fields.is_empty() {
            return Err(anyhow!("At least one field name is required"));
        }
        if iterations == 0 || chains == 0 {
            bail!("iterations and chains must be positive");
        }
        if thin == 0 {
            bail!("thin must be positive");
        }
        if burn_in >= iterations {
            bail!(
                "burn_in ({}) leaves no draws out of {} iterations",
                burn_in,
                iterations
            );
        }

        Ok(Gibbs {
            fields,
            structure,
            theta,
            iterations,
            chains,
            seed,
            burn_in,
            thin,
            v_prior,
            w_prior,
            buffer: BatchBuffer::default(),
        })
    }

    fn keep(&self, record: &ChainRecord) -> bool {
        record.iteration > self.burn_in && (record.iteration - self.burn_in - 1) % self.thin == 0
    }
}

impl TableFunction for Gibbs {
    fn process(&mut self, input: RecordBatch) -> Result<Option<RecordBatch>> {
        self.buffer.push(input);
        Ok(None)
    }

    fn finalize(&mut self) -> Result<Option<RecordBatch>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let y = self.buffer.observations(&self.fields)?;
        let builder = self.structure.builder(self.fields.len())?;
        let structure = builder.structure();
        let theta = match &self.theta {
            Some(theta) => theta.clone(),
            None => vec![1.0; builder.n_params()],
        };
        let priors = Priors {
            v: self.v_prior.prior(structure.n_series()),
            w: self.w_prior.prior(structure.n_state()),
        };
        let config = GibbsConfig::builder()
            .priors(priors)
            .iterations(self.iterations)
            .chains(self.chains)
            .seed(self.seed)
            .build()
            .context("invalid sampler configuration")?;
        let driver = GibbsDriver::new(&builder, &y, config).context("invalid Gibbs setup")?;

        tracing::info!(
            fields = ?self.fields,
            rows = y.n_steps(),
            chains = self.chains,
            iterations = self.iterations,
            "running gibbs sampler"
        );
        let output = driver.run(&theta).context("invalid starting parameters")?;
        for failure in output.failures() {
            tracing::warn!("{}", failure);
        }
        if output.records().next().is_none() {
            if let Some(failure) = output.failures().next() {
                bail!("no draws recorded: {}", failure);
            }
        }

        let kept: Vec<&ChainRecord> = output.records().filter(|r| self.keep(r)).collect();
        let p = structure.n_series();
        let d = structure.n_state();

        let mut output_fields = vec![
            Field::new("chain", DataType::Int64, false),
            Field::new("iteration", DataType::Int64, false),
        ];
        let mut output_columns: Vec<ArrayRef> = vec![
            Arc::new(Int64Array::from_iter_values(
                kept.iter().map(|r| r.chain_id as i64),
            )),
            Arc::new(Int64Array::from_iter_values(
                kept.iter().map(|r| r.iteration as i64),
            )),
        ];
        for i in 0..p {
            output_fields.push(Field::new(format!("v_{}", i + 1), DataType::Float64, false));
            output_columns.push(Arc::new(Float64Array::from_iter_values(
                kept.iter().map(|r| r.v[(i, i)]),
            )));
        }
        for j in 0..d {
            output_fields.push(Field::new(format!("w_{}", j + 1), DataType::Float64, false));
            output_columns.push(Arc::new(Float64Array::from_iter_values(
                kept.iter().map(|r| r.w[(j, j)]),
            )));
        }

        let output = RecordBatch::try_new(Arc::new(Schema::new(output_fields)), output_columns)
            .context("Failed to create output RecordBatch")?;
        self.buffer.clear();
        Ok(Some(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::AsArray;
    use arrow::datatypes::{Float64Type, Int64Type};

    fn create_test_batch(values: Vec<Option<f64>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("time", DataType::Int64, false),
            Field::new("value", DataType::Float64, true),
        ]));
        let time_array =
            Arc::new(Int64Array::from_iter_values(0..values.len() as i64)) as ArrayRef;
        let value_array = Arc::new(Float64Array::from(values)) as ArrayRef;
        RecordBatch::try_new(schema, vec![time_array, value_array])
            .expect("Failed to create test RecordBatch")
    }

    fn wavy(n: usize) -> Vec<Option<f64>> {
        (0..n)
            .map(|t| {
                let t = t as f64;
                (t % 7.0 != 3.0).then_some(10.0 + 0.1 * t + (t * 1.3).sin())
            })
            .collect()
    }

    #[test]
    fn test_gibbs_emits_one_row_per_draw() {
        let named_args = vec![
            ("fields".to_string(), Arg::from("value")),
            ("iterations".to_string(), Arg::Int(20)),
            ("chains".to_string(), Arg::Int(2)),
            ("seed".to_string(), Arg::Int(11)),
            ("theta".to_string(), Arg::from("1.0, 0.5")),
        ];
        let mut gibbs = Gibbs::new(None, named_args).expect("Failed to create Gibbs");
        assert!(gibbs.process(create_test_batch(wavy(30))).unwrap().is_none());
        assert!(gibbs.process(create_test_batch(wavy(10))).unwrap().is_none());

        let output = gibbs.finalize().expect("Finalize failed").expect("No output");
        assert_eq!(output.num_rows(), 40);
        assert_eq!(output.num_columns(), 4);
        let schema = output.schema();
        assert!(schema.field_with_name("v_1").is_ok());
        assert!(schema.field_with_name("w_1").is_ok());

        let chain = output.column(0).as_primitive::<Int64Type>();
        let iteration = output.column(1).as_primitive::<Int64Type>();
        assert_eq!(chain.value(0), 0);
        assert_eq!(chain.value(39), 1);
        assert_eq!(iteration.value(0), 1);
        assert_eq!(iteration.value(19), 20);
        let v = output.column(2).as_primitive::<Float64Type>();
        assert!(v.values().iter().all(|x| x.is_finite() && *x > 0.0));
    }

    #[test]
    fn test_gibbs_is_reproducible_and_thins() {
        let args = || {
            vec![
                ("fields".to_string(), Arg::from("value")),
                ("iterations".to_string(), Arg::Int(30)),
                ("burn_in".to_string(), Arg::Int(10)),
                ("thin".to_string(), Arg::Int(5)),
                ("seed".to_string(), Arg::Int(3)),
            ]
        };
        let run = || {
            let mut gibbs = Gibbs::new(None, args()).expect("Failed to create Gibbs");
            gibbs.process(create_test_batch(wavy(25))).unwrap();
            gibbs.finalize().unwrap().expect("No output")
        };
        let a = run();
        let b = run();
        assert_eq!(a, b);
        let iteration = a.column(1).as_primitive::<Int64Type>();
        assert_eq!(iteration.values().to_vec(), vec![11, 16, 21, 26]);
    }

    #[test]
    fn test_gibbs_trend_and_wishart_prior() {
        let named_args = vec![
            ("fields".to_string(), Arg::from("value")),
            ("iterations".to_string(), Arg::Int(5)),
            ("trend".to_string(), Arg::Int(2)),
            ("dof_w".to_string(), Arg::Float(4.0)),
            ("scale_w".to_string(), Arg::Float(0.5)),
        ];
        let mut gibbs = Gibbs::new(None, named_args).expect("Failed to create Gibbs");
        gibbs.process(create_test_batch(wavy(30))).unwrap();
        let output = gibbs.finalize().unwrap().expect("No output");
        // chain, iteration, v_1, w_1, w_2
        assert_eq!(output.num_columns(), 5);
        assert_eq!(output.num_rows(), 5);
    }

    #[test]
    fn test_gibbs_rejects_bad_arguments() {
        assert!(Gibbs::new(None, vec![]).is_err());
        let with = |name: &str, arg: Arg| {
            Gibbs::new(
                None,
                vec![("fields".to_string(), Arg::from("value")), (name.to_string(), arg)],
            )
        };
        assert!(with("iterations", Arg::Int(0)).is_err());
        assert!(with("burn_in", Arg::Int(5000)).is_err());
        assert!(with("shape_v", Arg::from("wide")).is_err());
        assert!(with("algorithm", Arg::from("LL")).is_err());
        assert!(
            Gibbs::new(
                Some(vec![Arg::Int(100)]),
                vec![("fields".to_string(), Arg::from("value"))],
            )
            .is_err()
        );

        // wrong theta length surfaces at finalize
        let mut gibbs = with("theta", Arg::from("1,1,1")).unwrap();
        gibbs.process(create_test_batch(wavy(10))).unwrap();
        assert!(gibbs.finalize().is_err());

        // negative rate is rejected before sampling
        let mut gibbs = with("rate_w", Arg::Float(-1.0)).unwrap();
        gibbs.process(create_test_batch(wavy(10))).unwrap();
        assert!(gibbs.finalize().is_err());
    }

    #[test]
    fn test_gibbs_empty_input() {
        let mut gibbs = Gibbs::new(None, vec![("fields".to_string(), Arg::from("value"))])
            .expect("Failed to create Gibbs");
        assert!(gibbs.finalize().unwrap().is_none());
    }
}
