use std::sync::Arc;

use anyhow::Context;
use envstate_api::{FunctionRegistry, TableFunction};

use crate::funcs::*;

pub mod funcs;
pub mod logging;

pub fn get_function_registries() -> anyhow::Result<Vec<FunctionRegistry>> {
    Ok(vec![
        FunctionRegistry::builder()
            .name("gibbs")
            .init(Arc::new(|ctx| {
                Gibbs::new(ctx.parameters, ctx.named_arguments)
                    .map(|f| Box::new(f) as Box<dyn TableFunction>)
            }))
            .signature(vec![])
            .build()
            .context("create `gibbs` registry failed")?,
        FunctionRegistry::builder()
            .name("interpolate")
            .init(Arc::new(|ctx| {
                Interpolate::new(ctx.parameters, ctx.named_arguments)
                    .map(|f| Box::new(f) as Box<dyn TableFunction>)
            }))
            .signature(vec![])
            .build()
            .context("create `interpolate` registry failed")?,
        FunctionRegistry::builder()
            .name("forecast")
            .init(Arc::new(|ctx| {
                Forecast::new(ctx.parameters, ctx.named_arguments)
                    .map(|f| Box::new(f) as Box<dyn TableFunction>)
            }))
            .signature(vec![])
            .build()
            .context("create `forecast` registry failed")?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Float64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use serde_json::json;

    #[test]
    fn test_registries() -> anyhow::Result<()> {
        let registries = get_function_registries()?;
        let names: Vec<&str> = registries.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["gibbs", "interpolate", "forecast"]);
        for registry in &registries {
            assert_eq!(registry.signatures()?, r#"[{"args":[]}]"#);
        }
        Ok(())
    }

    #[test]
    fn test_create_from_json_parameters() -> anyhow::Result<()> {
        let registries = get_function_registries()?;
        let forecast = registries
            .iter()
            .find(|r| r.name() == "forecast")
            .expect("forecast registered");
        let params = json!([
            {"name": "fields", "type": "string", "value": "level"},
            {"name": "theta", "type": "string", "value": "1.0,0.5"}
        ]);
        let mut f = envstate_api::create(forecast, Some(params.to_string().as_str()), "UTC")?;

        let schema = Arc::new(Schema::new(vec![Field::new("level", DataType::Float64, true)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Float64Array::from(vec![Some(1.0), None, Some(3.0)])) as ArrayRef],
        )?;
        assert!(f.process(batch)?.is_none());
        let output = f.finalize()?.expect("No output");
        assert_eq!(output.num_columns(), 3);

        let gibbs = registries
            .iter()
            .find(|r| r.name() == "gibbs")
            .expect("gibbs registered");
        let bad = json!([{"name": "fields", "type": "int", "value": 3}]);
        assert!(envstate_api::create(gibbs, Some(bad.to_string().as_str()), "UTC").is_err());
        Ok(())
    }
}
