//! Public facade for the tellurio client SDK.
//!
//! Default path: use this crate for login, connecting, and the ergonomic
//! Function/Optimizer wrappers. Use `tellurio::runtime` for the low-level
//! transport, registries, and wire contract directly.

mod client;
mod functions;
mod optimizer;

pub use client::{login, login_default, Client, ClientConfig, LoginOutcome};
pub use functions::{apply_function_many, apply_function_single, Add, DeterministicEvaluator, Split};
pub use optimizer::{Tgd, TgdConfig};

pub use tellurio_runtime::{
    allow_grad_fn_assignment, apply, decode_value, encode_arg, suppress_variable_notifications,
    ApplyOutput, Arg, CallableEntry, CredentialStore, Decoded, EntityRegistries, GradientEdge,
    HttpEndpoint, KeyringConfig, KeyringCredentialStore, ModelHandle, Node, OptimizerHandle,
    PendingGradFnMap, Project, ProjectVisibility, Registry, RpcErrorObject, Run, RunRecord,
    RunStatus, RunUser, Runtime, RuntimeConfig, TellurioClient, TellurioError, Variable,
    VerifyResponse, WsEndpoint,
};

pub use tellurio_runtime as runtime;
