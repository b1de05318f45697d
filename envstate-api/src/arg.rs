use serde::{Deserialize, Serialize};

pub type Args = Vec<Arg>;
pub type NamedArgs = Vec<(String, Arg)>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
#[serde(rename_all = "lowercase")]
pub enum Arg {
    Int(i64),
    String(String),
    Bool(bool),
    Float(f64),
    Column(String),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::String(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::String(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Arg::Bool(value)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

// for deserialize only, entries without a name are positional
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NamedArg {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub arg: Arg,
}

/// Split a raw argument list into positional and named arguments, keeping
/// the order within each.
pub(crate) fn split_args(raw: Vec<NamedArg>) -> (Args, NamedArgs) {
    let mut positional = Vec::new();
    let mut named = Vec::new();
    for NamedArg { name, arg } in raw {
        match name {
            Some(name) => named.push((name, arg)),
            None => positional.push(arg),
        }
    }
    (positional, named)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ArgType {
    Int,
    String,
    Bool,
    Float,
    Column,
}

impl Arg {
    pub fn is_scalar(&self) -> bool {
        use Arg as T;
        matches!(self, T::Int(_) | T::String(_) | T::Bool(_) | T::Float(_))
    }

    pub fn is_column(&self) -> bool {
        use Arg as T;
        matches!(self, T::Column(_))
    }

    pub fn arg_type(&self) -> ArgType {
        match self {
            Arg::Int(_) => ArgType::Int,
            Arg::String(_) => ArgType::String,
            Arg::Bool(_) => ArgType::Bool,
            Arg::Float(_) => ArgType::Float,
            Arg::Column(_) => ArgType::Column,
        }
    }
}

#[cfg(test)]
mod tests {

    use anyhow::Context;
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_args() -> anyhow::Result<()> {
        let args = serde_json::from_value::<Args>(
            json! {[{"type":"column","value":"temperature"},{"type":"float","value":0.5}]},
        )
        .context("Failed to parse arguments")?;
        assert_eq!(args, vec![Arg::Column("temperature".into()), Arg::Float(0.5)]);
        assert!(args[0].is_column());
        assert!(args[1].is_scalar());
        Ok(())
    }

    #[test]
    fn parse_named_args() -> anyhow::Result<()> {
        let raw = serde_json::from_value::<Vec<NamedArg>>(
            json! {[{"name":"fields","type":"string","value":"temperature"},{"type":"int","value":3},{"name":"iterations","type":"int","value":500}]},
        )
        .context("Failed to parse arguments")?;
        let (positional, named) = split_args(raw);
        assert_eq!(positional, vec![Arg::Int(3)]);
        assert_eq!(named.len(), 2);
        assert_eq!(named[0], ("fields".to_string(), Arg::from("temperature")));
        assert_eq!(named[1].1.arg_type(), ArgType::Int);
        Ok(())
    }
}
