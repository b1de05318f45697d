use anyhow::{Context, Result, anyhow};
use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::TableFunction;
use crate::funcs::input::{
    BatchBuffer, StructureOptions, parse_fields, parse_theta, reject_positional,
};
use dlm::KalmanFilter;
use envstate_api::arg::{Arg, Args, NamedArgs};

/// One-step-ahead forecast mean and variance of each selected field.
#[derive(Debug)]
pub struct Forecast {
    fields: Vec<String>,
    structure: StructureOptions,
    theta: Vec<f64>,
    buffer: BatchBuffer,
}

impl Forecast {
    pub fn new(parameters: Option<Args>, named_arguments: NamedArgs) -> Result<Self> {
        reject_positional("forecast", parameters)?;
        let mut fields = Vec::new();
        let mut structure = StructureOptions::default();
        let mut theta = None;

        for (name, arg) in named_arguments {
            if structure.accept(&name, &arg)? {
                continue;
            }
            match name.as_str() {
                "fields" => fields.extend(parse_fields(arg)?),
                "theta" => theta = Some(parse_theta(arg)?),
                _ => return Err(anyhow!("Unknown parameter: {}", name)),
            }
        }

        if fields.is_empty() {
            return Err(anyhow!("At least one field name is required"));
        }
        let theta = theta.ok_or_else(|| anyhow!("theta is required"))?;

        Ok(Forecast {
            fields,
            structure,
            theta,
            buffer: BatchBuffer::default(),
        })
    }
}

impl TableFunction for Forecast {
    fn process(&mut self, input: RecordBatch) -> Result<Option<RecordBatch>> {
        self.buffer.push(input);
        Ok(None)
    }

    fn finalize(&mut self) -> Result<Option<RecordBatch>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let y = self.buffer.observations(&self.fields)?;
        let model = self
            .structure
            .builder(self.fields.len())?
            .build(&self.theta)
            .context("invalid theta")?;
        let fr = KalmanFilter::new(&model)
            .filter(&y)
            .context("Kalman filter failed")?;
        tracing::debug!(log_likelihood = fr.log_likelihood(), "filtered");

        let (mut output_fields, mut output_columns) = self.buffer.columns()?;
        for (i, name) in self.fields.iter().enumerate() {
            let (means, vars) = fr
                .forecast(i)
                .ok_or_else(|| anyhow!("no forecast for {}", name))?;
            output_columns.push(Arc::new(Float64Array::from(means)) as ArrayRef);
            output_columns.push(Arc::new(Float64Array::from(vars)) as ArrayRef);
            output_fields.push(Field::new(
                format!("{}_forecast", name),
                DataType::Float64,
                true,
            ));
            output_fields.push(Field::new(
                format!("{}_forecast_var", name),
                DataType::Float64,
                true,
            ));
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
    use arrow::datatypes::Float64Type;

    fn create_test_batch(a: Vec<Option<f64>>, b: Vec<Option<f64>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("temperature", DataType::Float64, true),
            Field::new("humidity", DataType::Float64, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(a)) as ArrayRef,
                Arc::new(Float64Array::from(b)) as ArrayRef,
            ],
        )
        .expect("Failed to create test RecordBatch")
    }

    #[test]
    fn test_forecast_variance_tracks_gap() {
        let temps: Vec<Option<f64>> = (0..12).map(|t| Some(20.0 + 0.1 * t as f64)).collect();
        let hums: Vec<Option<f64>> = (0..12)
            .map(|t| (!(4..=7).contains(&t)).then_some(50.0 - 0.2 * t as f64))
            .collect();
        let named_args = vec![
            ("fields".to_string(), Arg::from("temperature")),
            ("fields".to_string(), Arg::from("humidity")),
            ("theta".to_string(), Arg::from("0.5,0.2,0.8,0.3")),
        ];
        let mut forecast = Forecast::new(None, named_args).expect("Failed to create Forecast");
        forecast.process(create_test_batch(temps, hums)).unwrap();
        let output = forecast
            .finalize()
            .expect("Finalize failed")
            .expect("No output");
        assert_eq!(output.num_rows(), 12);
        assert_eq!(output.num_columns(), 6);

        let schema = output.schema();
        let var = output
            .column(schema.index_of("humidity_forecast_var").unwrap())
            .as_primitive::<Float64Type>();
        assert!(var.values().iter().all(|v| v.is_finite() && *v > 0.0));
        for t in 5..=8 {
            assert!(var.value(t) > var.value(t - 1), "row {}", t);
        }
        assert!(var.value(9) < var.value(8));

        let mean = output
            .column(schema.index_of("temperature_forecast").unwrap())
            .as_primitive::<Float64Type>();
        assert!((mean.value(11) - 21.0).abs() < 0.5);
    }

    #[test]
    fn test_forecast_trend_structure() {
        let temps: Vec<Option<f64>> = (0..20).map(|t| Some(2.0 * t as f64)).collect();
        let named_args = vec![
            ("fields".to_string(), Arg::from("temperature")),
            ("trend".to_string(), Arg::Int(2)),
            ("theta".to_string(), Arg::from("0.01,0.0,0.0")),
        ];
        let mut forecast = Forecast::new(None, named_args).expect("Failed to create Forecast");
        forecast
            .process(create_test_batch(temps, vec![None; 20]))
            .unwrap();
        let output = forecast.finalize().unwrap().expect("No output");
        let mean = output.column(2).as_primitive::<Float64Type>();
        // a clean line is predicted almost exactly once the slope is learnt
        assert!((mean.value(19) - 38.0).abs() < 1e-3);
    }

    #[test]
    fn test_forecast_rejects_unknown_parameter() {
        let named_args = vec![
            ("fields".to_string(), Arg::from("temperature")),
            ("theta".to_string(), Arg::from("1,1")),
            ("holdback".to_string(), Arg::Int(2)),
        ];
        assert!(Forecast::new(None, named_args).is_err());
    }

    #[test]
    fn test_forecast_rejects_positional_arguments() {
        let named_args = vec![
            ("fields".to_string(), Arg::from("temperature")),
            ("theta".to_string(), Arg::from("1,1")),
        ];
        let result = Forecast::new(Some(vec![Arg::Column("temperature".into())]), named_args);
        assert!(result.is_err());
    }
}
