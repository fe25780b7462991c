//! Ergonomic, typed wrappers over the Function-Apply protocol
//! (`tellurio_runtime::function::apply`) for the operations named in the
//! end-to-end scenarios: `Add`, `Split`, and `DeterministicEvaluator`.
//! Any other server-side operation can still be reached through
//! `apply_function` directly with its textual name.

use tellurio_runtime::{apply, Arg, Runtime, TellurioError, Variable};

/// Invoke an arbitrary named server-side operation and require exactly one
/// Variable back. Most autodiff operations other than `Split` return a
/// single output.
pub async fn apply_function_single(
    runtime: &Runtime,
    function_name: &str,
    args: Vec<Arg>,
    kwargs: Vec<(String, Arg)>,
) -> Result<Variable, TellurioError> {
    apply(runtime, function_name, args, kwargs).await?.single()
}

/// Invoke an arbitrary named server-side operation and accept either a
/// single Variable or a sequence, flattened into a `Vec`.
pub async fn apply_function_many(
    runtime: &Runtime,
    function_name: &str,
    args: Vec<Arg>,
    kwargs: Vec<(String, Arg)>,
) -> Result<Vec<Variable>, TellurioError> {
    Ok(apply(runtime, function_name, args, kwargs).await?.into_vec())
}

/// Textual concatenation: `Add::apply(x, y)` returns one Variable whose
/// `data` is the server's textual combination of `x` and `y`.
pub struct Add;

impl Add {
    pub async fn apply(runtime: &Runtime, x: &Variable, y: &Variable) -> Result<Variable, TellurioError> {
        apply_function_single(
            runtime,
            "Add",
            vec![Arg::Variable(x.clone()), Arg::Variable(y.clone())],
            vec![],
        )
        .await
    }
}

/// Splits `x`'s textual data on `sep`, returning one Variable per part.
pub struct Split;

impl Split {
    pub async fn apply(
        runtime: &Runtime,
        x: &Variable,
        sep: impl Into<String>,
    ) -> Result<Vec<Variable>, TellurioError> {
        apply_function_many(
            runtime,
            "Split",
            vec![Arg::Variable(x.clone())],
            vec![("sep".to_string(), Arg::str(sep.into()))],
        )
        .await
    }
}

/// Scores `prediction` against `target`, returning a single Variable
/// whose `data` carries the evaluation result.
pub struct DeterministicEvaluator;

impl DeterministicEvaluator {
    pub async fn apply(
        runtime: &Runtime,
        prediction: &Variable,
        target: &Variable,
    ) -> Result<Variable, TellurioError> {
        apply_function_single(
            runtime,
            "DeterministicEvaluator",
            vec![Arg::Variable(prediction.clone()), Arg::Variable(target.clone())],
            vec![],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tellurio_runtime::testing::fake_runtime;

    #[tokio::test(flavor = "current_thread")]
    async fn add_sends_run_function_with_both_variables_tagged() {
        let (runtime, mut peer) = fake_runtime().await;
        let x = Variable::detached(json!("abc"), "first input", true);
        x.set_variable_id("x-1");
        let y = Variable::detached(json!("def"), "second input", false);
        y.set_variable_id("y-1");

        let call = tokio::spawn({
            let runtime = runtime.clone();
            let x = x.clone();
            let y = y.clone();
            async move { Add::apply(&runtime, &x, &y).await }
        });

        let request = peer
            .respond_to_next_call(json!({
                "data": {
                    "variable_id": "z-1",
                    "data": "abcdef",
                    "role": "first input and second input",
                    "requires_grad": true,
                    "is_leaf": false,
                }
            }))
            .await;

        assert_eq!(request["method"], "run_function");
        assert_eq!(request["params"]["function_name"], "Add");
        assert_eq!(request["params"]["args"][0]["variable_id"], "x-1");
        assert_eq!(request["params"]["args"][1]["variable_id"], "y-1");

        let result = call.await.unwrap().unwrap();
        assert_eq!(result.data(), json!("abcdef"));
        assert!(!result.is_leaf());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn split_returns_one_variable_per_part() {
        let (runtime, mut peer) = fake_runtime().await;
        let x = Variable::detached(json!("a b c"), "first input", true);
        x.set_variable_id("x-1");

        let call = tokio::spawn({
            let runtime = runtime.clone();
            let x = x.clone();
            async move { Split::apply(&runtime, &x, " ").await }
        });

        let request = peer
            .respond_to_next_call(json!({
                "data": [
                    {"variable_id": "p-0", "data": "a", "role": "split part 0 of first input", "requires_grad": true, "is_leaf": true},
                    {"variable_id": "p-1", "data": "b", "role": "split part 1 of first input", "requires_grad": true, "is_leaf": true},
                    {"variable_id": "p-2", "data": "c", "role": "split part 2 of first input", "requires_grad": true, "is_leaf": true},
                ]
            }))
            .await;

        assert_eq!(request["params"]["function_name"], "Split");
        assert_eq!(request["params"]["kwargs"]["sep"], " ");

        let parts = call.await.unwrap().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].data(), json!("a"));
        assert_eq!(parts[2].data(), json!("c"));
    }
}
