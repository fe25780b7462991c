//! Function-Apply protocol: turn "invoke operation F with these arguments"
//! into a single RPC and reconstitute its results.

use crate::entity::Variable;
use crate::errors::TellurioError;
use crate::runtime::Runtime;
use crate::wire::{decode_value, encode_arg, Arg, Decoded};

/// The outcome of applying an autodiff Function: either a single Variable
/// or an ordered sequence of Variables.
pub enum ApplyOutput {
    Single(Variable),
    Many(Vec<Variable>),
}

impl ApplyOutput {
    pub fn into_vec(self) -> Vec<Variable> {
        match self {
            ApplyOutput::Single(v) => vec![v],
            ApplyOutput::Many(vs) => vs,
        }
    }

    pub fn single(self) -> Result<Variable, TellurioError> {
        match self {
            ApplyOutput::Single(v) => Ok(v),
            ApplyOutput::Many(mut vs) if vs.len() == 1 => Ok(vs.remove(0)),
            ApplyOutput::Many(vs) => Err(TellurioError::type_error(
                "Vec<Variable>",
                format!("expected exactly one Variable, got {}", vs.len()),
            )),
        }
    }
}

/// Apply a named server-side operation to a set of arguments.
///
/// `function_name` is the textual name of the operation class (e.g. "Add",
/// "Split", "DeterministicEvaluator"). Arguments are encoded, sent as one
/// `run_function` RPC, and the response's `result.data` is decoded back
/// into Variables.
pub async fn apply(
    runtime: &Runtime,
    function_name: &str,
    args: Vec<Arg>,
    kwargs: Vec<(String, Arg)>,
) -> Result<ApplyOutput, TellurioError> {
    let mut encoded_args = Vec::with_capacity(args.len());
    for arg in &args {
        encoded_args.push(encode_arg(runtime, arg).await?);
    }

    let mut encoded_kwargs = serde_json::Map::new();
    for (k, v) in &kwargs {
        encoded_kwargs.insert(k.clone(), encode_arg(runtime, v).await?);
    }

    let params = serde_json::json!({
        "function_name": function_name,
        "args": encoded_args,
        "kwargs": encoded_kwargs,
    });

    let response = runtime
        .call("run_function", params, runtime.default_timeout())
        .await?;

    let data = response
        .get("result")
        .and_then(|r| r.get("data"))
        .ok_or_else(|| {
            TellurioError::protocol(format!(
                "run_function({function_name}) did not return result.data"
            ))
        })?;

    match decode_value(runtime, data).await? {
        Decoded::Variable(v) => Ok(ApplyOutput::Single(v)),
        Decoded::List(items) => {
            let mut vars = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Decoded::Variable(v) => vars.push(v),
                    other => {
                        return Err(TellurioError::type_error(
                            describe_decoded(&other),
                            "run_function output must be Variable or a sequence of Variables",
                        ))
                    }
                }
            }
            Ok(ApplyOutput::Many(vars))
        }
        other => Err(TellurioError::type_error(
            describe_decoded(&other),
            "run_function output must be Variable or a sequence of Variables",
        )),
    }
}

fn describe_decoded(decoded: &Decoded) -> &'static str {
    match decoded {
        Decoded::Variable(_) => "Variable",
        Decoded::Model(_) => "Model",
        Decoded::Callable(_) => "Callable",
        Decoded::List(_) => "List",
        Decoded::Primitive(_) => "Primitive",
    }
}
