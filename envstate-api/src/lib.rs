use anyhow::Context;
use arg::{Args, NamedArg, NamedArgs, split_args};
use arrow::array::RecordBatch;
use derive_builder::Builder;
use serde::Serialize;
use std::sync::Arc;

use crate::arg::ArgType;

pub mod arg;

/// Instantiate a table function from its registry.
///
/// `parameters` is a JSON array of `{"name"?, "type", "value"}` objects.
/// Entries carrying a `name` become named arguments, the rest are positional.
pub fn create(
    registry: &FunctionRegistry,
    parameters: Option<&str>,
    timezone: &str,
) -> anyhow::Result<Box<dyn TableFunction>> {
    let create_closure = &(registry.init);
    let (parameters, named_arguments) = if let Some(param) = parameters {
        let raw: Vec<NamedArg> = serde_json::from_str(param).context("serde json failed")?;
        let (positional, named) = split_args(raw);
        ((!positional.is_empty()).then_some(positional), named)
    } else {
        (None, Vec::new())
    };
    let ctx = FunctionContext {
        parameters,
        named_arguments,
        timezone: String::from(timezone),
    };
    create_closure(ctx)
}

type TableFunctionInitialize =
    Arc<dyn Fn(FunctionContext) -> anyhow::Result<Box<dyn TableFunction>> + Send + Sync>;

#[derive(Builder)]
pub struct FunctionRegistry {
    #[builder(setter(into))]
    name: &'static str,
    init: TableFunctionInitialize,
    #[builder(setter(strip_option, each(name = "signature", into)))]
    signatures: Option<Vec<Signature>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("name", &self.name)
            .field("init", &Arc::as_ptr(&self.init))
            .field("signatures", &self.signatures)
            .finish()
    }
}

impl FunctionRegistry {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn signatures(&self) -> anyhow::Result<String> {
        serde_json::to_string(&self.signatures).context("Failed to get signatures")
    }

    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::default()
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Signature {
    pub args: Vec<ArgType>,
}

impl From<Vec<ArgType>> for Signature {
    fn from(value: Vec<ArgType>) -> Self {
        Signature { args: value }
    }
}

pub struct FunctionContext {
    pub parameters: Option<Args>,
    pub named_arguments: NamedArgs,
    pub timezone: String,
}

pub trait TableFunction {
    fn process(&mut self, input: RecordBatch) -> anyhow::Result<Option<RecordBatch>>;

    fn finalize(&mut self) -> anyhow::Result<Option<RecordBatch>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arg::Arg;

    struct Echo;

    impl TableFunction for Echo {
        fn process(&mut self, input: RecordBatch) -> anyhow::Result<Option<RecordBatch>> {
            Ok(Some(input))
        }
    }

    fn echo_registry() -> FunctionRegistry {
        FunctionRegistry::builder()
            .name("echo")
            .init(Arc::new(|ctx: FunctionContext| {
                anyhow::ensure!(ctx.parameters.is_none(), "echo takes no positional arguments");
                for (name, arg) in ctx.named_arguments {
                    anyhow::ensure!(
                        name == "fields" && matches!(arg, Arg::String(_)),
                        "unexpected argument {}",
                        name
                    );
                }
                Ok(Box::new(Echo) as Box<dyn TableFunction>)
            }))
            .signature(vec![ArgType::String])
            .build()
            .expect("registry")
    }

    #[test]
    fn test_registry() -> anyhow::Result<()> {
        let registry = echo_registry();
        assert_eq!(registry.name(), "echo");
        assert_eq!(registry.signatures()?, r#"[{"args":["STRING"]}]"#);
        assert!(format!("{:?}", registry).contains("echo"));
        Ok(())
    }

    #[test]
    fn test_create_splits_named_arguments() {
        let registry = echo_registry();
        assert!(
            create(
                &registry,
                Some(r#"[{"name":"fields","type":"string","value":"humidity"}]"#),
                "UTC",
            )
            .is_ok()
        );
        assert!(
            create(
                &registry,
                Some(r#"[{"name":"seed","type":"int","value":7}]"#),
                "UTC",
            )
            .is_err()
        );
        assert!(create(&registry, Some(r#"[{"type":"int","value":1}]"#), "UTC").is_err());
        assert!(create(&registry, Some("not json"), "UTC").is_err());
        assert!(create(&registry, None, "UTC").is_ok());
    }
}
