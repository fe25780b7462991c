//! Textual Gradient Descent (TGD): the one concrete optimizer named in the
//! data model. Wraps an `OptimizerHandle` with the `step`/`zero_grad`
//! lifecycle a user-facing optimizer needs.

use serde_json::Value;

use tellurio_runtime::{ModelHandle, OptimizerHandle, Runtime, TellurioError, Variable};

/// Configuration carried in the optimizer's `defaults` mapping: message
/// templates, optional dynamic inputs, optional natural-language
/// constraints, and a momentum window size.
#[derive(Clone, Debug)]
pub struct TgdConfig {
    pub messages: Vec<Value>,
    pub inputs: Option<Value>,
    pub constraints: Option<Vec<String>>,
    pub momentum: u32,
}

impl TgdConfig {
    pub fn new(messages: Vec<Value>) -> Self {
        Self {
            messages,
            inputs: None,
            constraints: None,
            momentum: 0,
        }
    }

    pub fn with_inputs(mut self, inputs: Value) -> Self {
        self.inputs = Some(inputs);
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_momentum(mut self, momentum: u32) -> Self {
        self.momentum = momentum;
        self
    }

    fn to_defaults(&self) -> Value {
        serde_json::json!({
            "messages": self.messages,
            "inputs": self.inputs,
            "constraints": self.constraints,
            "momentum": self.momentum,
        })
    }
}

/// A Textual Gradient Descent optimizer over a fixed parameter group.
pub struct Tgd {
    handle: OptimizerHandle,
}

impl Tgd {
    /// Register the optimizer on the server, adopting the id it returns,
    /// mirroring the create-then-adopt lifecycle every mirrored entity
    /// uses.
    pub async fn new(
        runtime: &Runtime,
        params: Vec<Variable>,
        model: ModelHandle,
        config: TgdConfig,
    ) -> Result<Self, TellurioError> {
        let defaults = config.to_defaults();
        let param_tags: Vec<Value> = params.iter().map(tellurio_runtime::entity::tag_variable).collect();
        let request = serde_json::json!({
            "kind": "TGD",
            "model_id": model.model_id(),
            "params": param_tags,
            "defaults": defaults,
        });
        let response = runtime
            .call("create_optimizer", request, runtime.default_timeout())
            .await?;
        let optimizer_id = response
            .get("result")
            .and_then(|r| r.get("optimizer_id"))
            .and_then(Value::as_str)
            .ok_or_else(|| TellurioError::protocol("create_optimizer: missing optimizer_id"))?
            .to_string();

        let handle = OptimizerHandle::new(optimizer_id.clone(), params, Some(model), defaults);
        runtime
            .registries()
            .optimizers
            .register(optimizer_id, handle.clone())
            .await;
        Ok(Self { handle })
    }

    pub fn handle(&self) -> &OptimizerHandle {
        &self.handle
    }

    /// Run the optional closure to obtain a loss Variable (discarded — the
    /// server recomputes its own view of loss from the parameter group's
    /// live grads), then perform the server-side optimization step.
    pub async fn step<F, Fut>(&self, runtime: &Runtime, closure: Option<F>) -> Result<(), TellurioError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Variable, TellurioError>>,
    {
        if let Some(closure) = closure {
            closure().await?;
        }
        runtime
            .call(
                "optimizer_step",
                serde_json::json!({ "optimizer_id": self.handle.optimizer_id() }),
                runtime.default_timeout(),
            )
            .await?;
        Ok(())
    }

    /// Clear accumulated gradients on every parameter in the group, both
    /// locally and on the server.
    pub async fn zero_grad(&self, runtime: &Runtime) -> Result<(), TellurioError> {
        for param in self.handle.params() {
            param.clear_grad_local();
        }
        runtime
            .call(
                "optimizer_zero_grad",
                serde_json::json!({ "optimizer_id": self.handle.optimizer_id() }),
                runtime.default_timeout(),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tellurio_runtime::testing::fake_runtime;

    #[tokio::test(flavor = "current_thread")]
    async fn new_adopts_server_assigned_optimizer_id() {
        let (runtime, mut peer) = fake_runtime().await;
        let model = ModelHandle::new("model-1", json!({}));
        let param = Variable::detached(json!("a system prompt"), "system prompt", true);
        param.set_variable_id("param-1");

        let call = tokio::spawn({
            let runtime = runtime.clone();
            let model = model.clone();
            let param = param.clone();
            async move { Tgd::new(&runtime, vec![param], model, TgdConfig::new(vec![])).await }
        });

        let request = peer
            .respond_to_next_call(json!({ "optimizer_id": "opt-1" }))
            .await;
        assert_eq!(request["method"], "create_optimizer");
        assert_eq!(request["params"]["params"][0]["variable_id"], "param-1");

        let tgd = call.await.unwrap().unwrap();
        assert_eq!(tgd.handle().optimizer_id(), "opt-1");
        assert!(runtime.registries().optimizers.contains("opt-1").await);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn zero_grad_clears_params_and_notifies_server() {
        let (runtime, mut peer) = fake_runtime().await;
        let model = ModelHandle::new("model-1", json!({}));
        let param = Variable::detached(json!("x"), "role", true);
        param.set_variable_id("param-1");
        {
            let _suppress = tellurio_runtime::suppress_variable_notifications();
            param.append_grad_local(Variable::detached(json!("g"), "grad", false));
        }
        assert!(!param.grad().is_empty());

        let handle = OptimizerHandle::new("opt-1", vec![param.clone()], Some(model), json!({}));
        let tgd = Tgd { handle };

        let call = tokio::spawn({
            let runtime = runtime.clone();
            async move { tgd.zero_grad(&runtime).await }
        });
        let request = peer.respond_to_next_call(json!({"message":"Ok"})).await;
        assert_eq!(request["method"], "optimizer_zero_grad");
        call.await.unwrap().unwrap();

        assert!(param.grad().is_empty());
    }
}
