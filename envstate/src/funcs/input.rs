//! Argument parsing and input buffering shared by the table functions.

use anyhow::{Context, Result, anyhow, bail};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::{cast, concat};
use arrow::datatypes::{DataType, Float64Type};
use arrow::record_batch::RecordBatch;
use arrow_schema::{Field, SchemaRef};

use dlm::{ModelBuilder, ModelStructure, ObservationMatrix, SeriesStructure};
use envstate_api::arg::{Arg, Args};

/// The table functions take named arguments only.
pub(crate) fn reject_positional(function: &str, parameters: Option<Args>) -> Result<()> {
    match parameters {
        Some(args) if !args.is_empty() => Err(anyhow!(
            "{} takes named arguments only, got {} positional",
            function,
            args.len()
        )),
        _ => Ok(()),
    }
}

/// Field names from a `fields` argument. Names may be comma separated.
pub(crate) fn parse_fields(arg: Arg) -> Result<Vec<String>> {
    let Arg::String(s) = arg else {
        return Err(anyhow!("fields must be a string"));
    };
    let names: Vec<String> = s
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect();
    if names.is_empty() {
        bail!("fields must name at least one column");
    }
    Ok(names)
}

/// Parameter vector from a comma separated string or a single number.
pub(crate) fn parse_theta(arg: Arg) -> Result<Vec<f64>> {
    match arg {
        Arg::String(s) => s
            .split(',')
            .map(|v| {
                v.trim()
                    .parse::<f64>()
                    .with_context(|| format!("theta entry `{}` is not a number", v.trim()))
            })
            .collect(),
        Arg::Float(f) => Ok(vec![f]),
        Arg::Int(i) => Ok(vec![i as f64]),
        _ => Err(anyhow!("theta must be a comma separated list of numbers")),
    }
}

pub(crate) fn parse_count(name: &str, arg: Arg) -> Result<usize> {
    match arg {
        Arg::Int(i) if i >= 0 => Ok(i as usize),
        Arg::String(s) => s
            .trim()
            .parse()
            .with_context(|| format!("{} must be a non-negative integer", name)),
        _ => Err(anyhow!("{} must be a non-negative integer", name)),
    }
}

pub(crate) fn parse_float(name: &str, arg: Arg) -> Result<f64> {
    let value = match arg {
        Arg::Float(f) => f,
        Arg::Int(i) => i as f64,
        Arg::String(s) => s
            .trim()
            .parse()
            .with_context(|| format!("{} must be a number", name))?,
        _ => return Err(anyhow!("{} must be a number", name)),
    };
    if !value.is_finite() {
        bail!("{} must be finite", name);
    }
    Ok(value)
}

/// Confidence level in (0, 1). Percentages in (1, 100) are accepted.
pub(crate) fn parse_confidence(arg: Arg) -> Result<f64> {
    let value = parse_float("confidence", arg)?;
    if value > 0.0 && value < 1.0 {
        Ok(value)
    } else if value > 1.0 && value < 100.0 {
        Ok(value / 100.0)
    } else {
        Err(anyhow!(
            "confidence must be between 0 and 1 or 1 and 100, got {}",
            value
        ))
    }
}

/// Per-series layout shared by every requested field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StructureOptions {
    pub trend: usize,
    pub period: usize,
    pub harmonics: usize,
}

impl Default for StructureOptions {
    fn default() -> Self {
        Self {
            trend: 1,
            period: 0,
            harmonics: 0,
        }
    }
}

impl StructureOptions {
    /// Consume `trend`, `period` and `harmonics`. Returns false for any other name.
    pub fn accept(&mut self, name: &str, arg: &Arg) -> Result<bool> {
        let slot = match name {
            "trend" => &mut self.trend,
            "period" => &mut self.period,
            "harmonics" => &mut self.harmonics,
            _ => return Ok(false),
        };
        *slot = parse_count(name, arg.clone())?;
        Ok(true)
    }

    /// Model builder for `n_series` series with this layout.
    pub fn builder(&self, n_series: usize) -> Result<ModelBuilder> {
        let series = SeriesStructure {
            trend_order: self.trend,
            period: self.period,
            harmonics: self.harmonics,
        };
        let structure = ModelStructure::new(vec![series; n_series])
            .context("invalid model structure")?;
        ModelBuilder::new(structure).context("invalid model structure")
    }
}

/// Record batches held until `finalize`.
#[derive(Debug, Default)]
pub(crate) struct BatchBuffer {
    batches: Vec<RecordBatch>,
}

impl BatchBuffer {
    pub fn push(&mut self, batch: RecordBatch) {
        if batch.num_rows() > 0 {
            self.batches.push(batch);
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn clear(&mut self) {
        self.batches.clear();
    }

    pub fn schema(&self) -> Option<SchemaRef> {
        self.batches.first().map(|b| b.schema())
    }

    /// Observation matrix with one series per field. Nulls and NaN are missing.
    pub fn observations(&self, fields: &[String]) -> Result<ObservationMatrix> {
        let schema = self
            .schema()
            .ok_or_else(|| anyhow!("no input rows buffered"))?;
        let mut columns = Vec::with_capacity(fields.len());
        for name in fields {
            let idx = schema
                .index_of(name)
                .map_err(|_| anyhow!("Field not found: {}", name))?;
            let mut values = Vec::with_capacity(self.num_rows());
            for batch in &self.batches {
                values.extend(numeric_values(batch.column(idx))?);
            }
            columns.push(values);
        }
        ObservationMatrix::from_columns(columns).context("invalid observations")
    }

    /// Input columns concatenated across batches.
    pub fn columns(&self) -> Result<(Vec<Field>, Vec<ArrayRef>)> {
        let schema = self
            .schema()
            .ok_or_else(|| anyhow!("no input rows buffered"))?;
        let mut fields = Vec::with_capacity(schema.fields().len());
        let mut arrays = Vec::with_capacity(schema.fields().len());
        for (col_idx, field) in schema.fields().iter().enumerate() {
            let refs: Vec<&dyn Array> = self
                .batches
                .iter()
                .map(|b| b.column(col_idx).as_ref())
                .collect();
            arrays.push(concat(&refs).context("Failed to concatenate arrays")?);
            fields.push(field.as_ref().clone());
        }
        Ok((fields, arrays))
    }
}

fn numeric_values(array: &ArrayRef) -> Result<Vec<Option<f64>>> {
    let array = if matches!(array.data_type(), DataType::Float64) {
        array.clone()
    } else {
        cast(array, &DataType::Float64)
            .with_context(|| format!("cannot read {} as a number", array.data_type()))?
    };
    Ok(array
        .as_primitive::<Float64Type>()
        .iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect())
}
