//! Runtime, transport, and JSON-RPC contract layer for the tellurio client.
//!
//! This crate owns the duplex WebSocket connection to the tellurio backend,
//! the mirrored client-side entity model (Variables, Nodes, Models,
//! Optimizers), the tagged wire encoding between them, and the REST/keyring
//! collaborators used during login and run tracking. The `tellurio` crate
//! builds the ergonomic user-facing API on top of this one.

pub mod config;
pub mod credential;
pub mod entity;
pub mod errors;
pub mod events;
pub mod function;
pub mod registry;
pub mod rest;
pub mod rpc;
pub mod run_context;
pub mod runtime;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod wire;

pub use config::{HttpEndpoint, KeyringConfig, WsEndpoint};
pub use credential::{CredentialStore, KeyringCredentialStore};
pub use entity::{CallableEntry, GradientEdge, ModelHandle, Node, OptimizerHandle, Variable};
pub use errors::{RpcErrorObject, TellurioError};
pub use function::{apply, ApplyOutput};
pub use registry::{EntityRegistries, PendingGradFnMap, Registry};
pub use rest::{
    CreateRunRequest, Project, ProjectVisibility, RunRecord, RunStatus, RunUser, TellurioClient,
    VerifyResponse,
};
pub use run_context::{active_run_uuid, set_active_run_uuid, Run};
pub use runtime::{ReconnectPolicy, Runtime, RuntimeConfig};
pub use state::{allow_grad_fn_assignment, suppress_variable_notifications};
pub use wire::{decode_value, encode_arg, Arg, Decoded};
