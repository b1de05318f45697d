use anyhow::{Context, Result, anyhow};
use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::sync::Arc;

use crate::TableFunction;
use crate::funcs::input::{
    BatchBuffer, StructureOptions, parse_confidence, parse_fields, parse_theta, reject_positional,
};
use dlm::dist::prediction_interval;
use dlm::{KalmanFilter, KalmanSmoother};
use envstate_api::arg::{Arg, Args, NamedArgs};

/// Fills gaps and denoises the selected fields with the smoothed signal at a
/// fixed parameter vector.
#[derive(Debug)]
pub struct Interpolate {
    fields: Vec<String>,
    structure: StructureOptions,
    theta: Vec<f64>,
    confidence: f64,
    buffer: BatchBuffer,
}

impl Interpolate {
    pub fn new(parameters: Option<Args>, named_arguments: NamedArgs) -> Result<Self> {
        reject_positional("interpolate", parameters)?;
        let mut fields = Vec::new();
        let mut structure = StructureOptions::default();
        let mut theta = None;
        let mut confidence = 0.95;

        for (name, arg) in named_arguments {
            if structure.accept(&name, &arg)? {
                continue;
            }
            match name.as_str() {
                "fields" => fields.extend(parse_fields(arg)?),
                "theta" => theta = Some(parse_theta(arg)?),
                "confidence" => confidence = parse_confidence(arg)?,
                _ => return Err(anyhow!("Unknown parameter: {}", name)),
            }
        }

        if fields.is_empty() {
            return Err(anyhow!("At least one field name is required"));
        }
        let theta = theta.ok_or_else(|| anyhow!("theta is required"))?;

        Ok(Interpolate {
            fields,
            structure,
            theta,
            confidence,
            buffer: BatchBuffer::default(),
        })
    }
}

impl TableFunction for Interpolate {
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
        let sr = KalmanSmoother::new(&model)
            .smooth(&fr)
            .context("Kalman smoother failed")?;

        let (mut output_fields, mut output_columns) = self.buffer.columns()?;
        for (i, name) in self.fields.iter().enumerate() {
            let (means, vars) = sr
                .series(i)
                .ok_or_else(|| anyhow!("no smoothed series for {}", name))?;
            let mut lower = Vec::with_capacity(means.len());
            let mut upper = Vec::with_capacity(means.len());
            for (m, v) in means.iter().zip(&vars) {
                let (lo, hi) = prediction_interval(*m, *v, self.confidence)
                    .context("Failed to compute smoothing interval")?;
                lower.push(lo);
                upper.push(hi);
            }

            output_columns.push(Arc::new(Float64Array::from(means)) as ArrayRef);
            output_columns.push(Arc::new(Float64Array::from(lower)) as ArrayRef);
            output_columns.push(Arc::new(Float64Array::from(upper)) as ArrayRef);
            for suffix in ["smoothed", "smoothed_lower", "smoothed_upper"] {
                output_fields.push(Field::new(
                    format!("{}_{}", name, suffix),
                    DataType::Float64,
                    true,
                ));
            }
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
    use arrow::array::{AsArray, Int32Array};
    use arrow::datatypes::Float64Type;

    fn create_test_batch(a: Vec<Option<f64>>, b: Vec<Option<f64>>) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("time", DataType::Int32, false),
            Field::new("temperature", DataType::Float64, true),
            Field::new("humidity", DataType::Float64, true),
        ]));
        let time_array = Arc::new(Int32Array::from((0..a.len() as i32).collect::<Vec<_>>()));
        RecordBatch::try_new(
            schema,
            vec![
                time_array as ArrayRef,
                Arc::new(Float64Array::from(a)) as ArrayRef,
                Arc::new(Float64Array::from(b)) as ArrayRef,
            ],
        )
        .expect("Failed to create test RecordBatch")
    }

    #[test]
    fn test_interpolate_fills_gaps() {
        let temps = vec![Some(10.0), Some(11.0), None, None, Some(14.0), Some(15.0)];
        let hums = vec![Some(60.0), None, Some(58.0), Some(57.0), None, Some(55.0)];
        let named_args = vec![
            ("fields".to_string(), Arg::from("temperature,humidity")),
            ("theta".to_string(), Arg::from("0.1,0.5,0.2,0.3")),
        ];
        let mut interpolate =
            Interpolate::new(None, named_args).expect("Failed to create Interpolate");
        assert!(interpolate.process(create_test_batch(temps, hums)).unwrap().is_none());

        let output = interpolate
            .finalize()
            .expect("Finalize failed")
            .expect("No output");
        assert_eq!(output.num_rows(), 6);
        assert_eq!(output.num_columns(), 3 + 6);

        let schema = output.schema();
        let smoothed = output
            .column(schema.index_of("temperature_smoothed").unwrap())
            .as_primitive::<Float64Type>();
        let lower = output
            .column(schema.index_of("temperature_smoothed_lower").unwrap())
            .as_primitive::<Float64Type>();
        let upper = output
            .column(schema.index_of("temperature_smoothed_upper").unwrap())
            .as_primitive::<Float64Type>();
        for t in 0..6 {
            assert!(smoothed.value(t).is_finite());
            assert!(lower.value(t) < smoothed.value(t) && smoothed.value(t) < upper.value(t));
        }
        // gap values sit between their neighbours and are less certain
        assert!(smoothed.value(2) > smoothed.value(1) && smoothed.value(3) < smoothed.value(4));
        assert!(upper.value(2) - lower.value(2) > upper.value(0) - lower.value(0));
        assert!(schema.field_with_name("humidity_smoothed").is_ok());
    }

    #[test]
    fn test_interpolate_confidence_widens_band() {
        let run = |confidence: f64| {
            let named_args = vec![
                ("fields".to_string(), Arg::from("temperature")),
                ("theta".to_string(), Arg::from("0.4,0.2")),
                ("confidence".to_string(), Arg::Float(confidence)),
            ];
            let mut f = Interpolate::new(None, named_args).expect("Failed to create Interpolate");
            f.process(create_test_batch(
                vec![Some(1.0), Some(2.0), Some(1.5)],
                vec![None, None, None],
            ))
            .unwrap();
            let output = f.finalize().unwrap().expect("No output");
            let lower = output.column(4).as_primitive::<Float64Type>().value(1);
            let upper = output.column(5).as_primitive::<Float64Type>().value(1);
            upper - lower
        };
        assert!(run(0.99) > run(0.5));
    }

    #[test]
    fn test_interpolate_rejects_positional_arguments() {
        let named_args = vec![
            ("fields".to_string(), Arg::from("temperature")),
            ("theta".to_string(), Arg::from("0.4,0.2")),
        ];
        assert!(Interpolate::new(Some(vec![Arg::Float(0.9)]), named_args.clone()).is_err());
        assert!(Interpolate::new(Some(vec![]), named_args).is_ok());
    }

    #[test]
    fn test_interpolate_requires_theta() {
        let result = Interpolate::new(None, vec![("fields".to_string(), Arg::from("temperature"))]);
        assert!(result.is_err());

        let named_args = vec![
            ("fields".to_string(), Arg::from("temperature")),
            ("theta".to_string(), Arg::from("0.4,-0.2")),
        ];
        let mut f = Interpolate::new(None, named_args).expect("Failed to create Interpolate");
        f.process(create_test_batch(vec![Some(1.0)], vec![Some(2.0)]))
            .unwrap();
        assert!(f.finalize().is_err());
    }
}
