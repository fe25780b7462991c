//! Login flow and the top-level `Client` that ties the WebSocket runtime,
//! the REST collaborator, and the credential store together.

use std::time::Duration;

use tellurio_runtime::{
    CredentialStore, HttpEndpoint, KeyringCredentialStore, Run, RunStatus, Runtime, RuntimeConfig,
    TellurioClient, TellurioError,
};

/// Everything needed to reach the backend: endpoints plus the connect-time
/// knobs `Runtime::connect` exposes.
#[derive(Clone)]
pub struct ClientConfig {
    pub http_endpoint: HttpEndpoint,
    pub ws_url: Option<String>,
    pub connect_retries: u32,
    pub connect_retry_delay: Duration,
    pub default_call_timeout: Duration,
}

impl ClientConfig {
    /// Endpoints resolved from `TELLURIO_BACKEND_*` environment variables,
    /// three connect retries five seconds apart, and a 60s default call
    /// timeout — the same defaults `RuntimeConfig::new` uses.
    pub fn from_env() -> Self {
        Self {
            http_endpoint: HttpEndpoint::from_env(),
            ws_url: None,
            connect_retries: 3,
            connect_retry_delay: Duration::from_secs(5),
            default_call_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.connect_retries = retries;
        self.connect_retry_delay = delay;
        self
    }

    pub fn with_default_call_timeout(mut self, timeout: Duration) -> Self {
        self.default_call_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// The account identity returned by a successful `login`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoginOutcome {
    pub email: String,
    pub username: Option<String>,
    pub api_key: String,
}

/// Resolve the API key to use, verify it against the backend, and persist
/// it to the credential store only on verified success.
///
/// - `api_key = Some(key)`: use `key` directly, regardless of `relogin`.
/// - `api_key = None`, `relogin = false`: read the stored key; absent is
///   `InvalidCredential`.
/// - `api_key = None`, `relogin = true`: always `InvalidCredential`, since
///   a re-login with nothing to re-verify is meaningless.
pub async fn login(
    credential_store: &dyn CredentialStore,
    http_endpoint: HttpEndpoint,
    api_key: Option<String>,
    relogin: bool,
) -> Result<LoginOutcome, TellurioError> {
    let resolved_key = match (api_key, relogin) {
        (Some(key), _) => key,
        (None, false) => credential_store.get_api_key()?.ok_or_else(|| {
            TellurioError::InvalidCredential {
                reason: "API key is required for the first login".to_string(),
            }
        })?,
        (None, true) => {
            return Err(TellurioError::InvalidCredential {
                reason: "API key is required for re-login".to_string(),
            })
        }
    };

    let rest = TellurioClient::new(http_endpoint, resolved_key.clone());
    let verified = rest.verify_api_key().await?;
    credential_store.set_api_key(&resolved_key)?;
    tracing::info!(email = %verified.email, "login verified");

    Ok(LoginOutcome {
        email: verified.email,
        username: verified.username,
        api_key: resolved_key,
    })
}

/// Login against the default keyring-backed credential store and
/// environment-resolved HTTP endpoint.
pub async fn login_default(
    api_key: Option<String>,
    relogin: bool,
) -> Result<LoginOutcome, TellurioError> {
    let store = KeyringCredentialStore::from_env();
    login(&store, HttpEndpoint::from_env(), api_key, relogin).await
}

/// A logged-in, connected session: the JSON-RPC `Runtime`, the REST
/// collaborator, and the verified account identity.
#[derive(Clone)]
pub struct Client {
    runtime: Runtime,
    rest: std::sync::Arc<TellurioClient>,
    email: String,
}

impl Client {
    /// Log in (optionally with an explicit key / re-login) and open the
    /// WebSocket runtime with the resolved key.
    pub async fn connect(
        config: ClientConfig,
        credential_store: &dyn CredentialStore,
        api_key: Option<String>,
        relogin: bool,
    ) -> Result<Self, TellurioError> {
        let outcome = login(
            credential_store,
            config.http_endpoint.clone(),
            api_key,
            relogin,
        )
        .await?;

        let mut runtime_config = RuntimeConfig::new(outcome.api_key.clone())
            .with_retries(config.connect_retries, config.connect_retry_delay);
        if let Some(ws_url) = config.ws_url {
            runtime_config = runtime_config.with_ws_url(ws_url);
        }
        runtime_config.default_call_timeout = config.default_call_timeout;

        let (runtime, session_id) = Runtime::connect(runtime_config).await?;
        tracing::info!(%session_id, email = %outcome.email, "client connected");
        let rest = TellurioClient::new(config.http_endpoint, outcome.api_key);

        Ok(Self {
            runtime,
            rest: std::sync::Arc::new(rest),
            email: outcome.email,
        })
    }

    /// Connect using the default keyring credential store and
    /// environment-resolved endpoints.
    pub async fn connect_default(
        api_key: Option<String>,
        relogin: bool,
    ) -> Result<Self, TellurioError> {
        let store = KeyringCredentialStore::from_env();
        Self::connect(ClientConfig::from_env(), &store, api_key, relogin).await
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn rest(&self) -> &TellurioClient {
        &self.rest
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Ensure a project exists and start a run under it, tracked as the
    /// process-wide active run.
    pub async fn init_run(
        &self,
        namespace_slug: &str,
        project_display_name: &str,
        name: Option<String>,
        description: Option<String>,
        status: Option<RunStatus>,
    ) -> Result<Run, TellurioError> {
        tellurio_runtime::run_context::init(
            self.rest.as_ref(),
            namespace_slug,
            project_display_name,
            name,
            description,
            status,
        )
        .await
    }

    /// Close the WebSocket runtime. Does not affect the active-run id;
    /// call `Run::finish` explicitly first if the run should end cleanly.
    pub async fn shutdown(&self) {
        self.runtime.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tellurio_runtime::credential::fake::FakeCredentialStore;

    #[tokio::test(flavor = "current_thread")]
    async fn login_fails_without_stored_or_explicit_key() {
        let store = FakeCredentialStore::empty();
        let err = login(&store, HttpEndpoint::from_env(), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TellurioError::InvalidCredential { .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn relogin_without_explicit_key_fails() {
        let store = FakeCredentialStore::seeded("sk-old");
        let err = login(&store, HttpEndpoint::from_env(), None, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TellurioError::InvalidCredential { .. }));
    }
}
