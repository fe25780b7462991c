//! Environment-driven configuration for the WebSocket runtime, the REST
//! collaborator, and the credential store.
//!
//! Every value is read from the environment at the construction site
//! (`WsEndpoint::from_env`, `HttpEndpoint::from_env`, `KeyringConfig::from_env`)
//! rather than cached once at process start, so tests can set
//! `std::env::set_var` ahead of constructing a client without restarting
//! anything.

use std::env;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_port(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// WebSocket endpoint for the JSON-RPC transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsEndpoint {
    pub base_url: String,
    pub port: u16,
}

impl WsEndpoint {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("TELLURIO_BACKEND_WS_BASE_URL", "wss://platform.tellurio.ai"),
            port: env_port("TELLURIO_BACKEND_WS_PORT", 443),
        }
    }

    /// Build the full `/ws/v0/rpc/` URL.
    pub fn url(&self) -> String {
        format!("{}:{}/ws/v0/rpc/", self.base_url, self.port)
    }
}

/// HTTP endpoint for the REST collaborator (login, projects, runs).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpEndpoint {
    pub base_url: String,
    pub port: u16,
}

impl HttpEndpoint {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string(
                "TELLURIO_BACKEND_HTTP_BASE_URL",
                "https://platform.tellurio.ai",
            ),
            port: env_port("TELLURIO_BACKEND_HTTP_PORT", 443),
        }
    }

    /// Build `{base_url}:{port}{path}`, where `path` starts with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}:{}{}", self.base_url, self.port, path)
    }
}

/// Service/entry names for the OS-keyring-backed credential store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyringConfig {
    pub service_name: String,
    pub entry_name: String,
}

impl KeyringConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: env_string("KEYRING_SERVICE_NAME", "tellurio"),
            entry_name: "api_key".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // std::env is process-global; serialize tests that mutate it.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn ws_endpoint_defaults() {
        let _guard = TEST_LOCK.lock().unwrap();
        env::remove_var("TELLURIO_BACKEND_WS_BASE_URL");
        env::remove_var("TELLURIO_BACKEND_WS_PORT");
        let ep = WsEndpoint::from_env();
        assert_eq!(ep.url(), "wss://platform.tellurio.ai:443/ws/v0/rpc/");
    }

    #[test]
    fn ws_endpoint_reads_env_overrides() {
        let _guard = TEST_LOCK.lock().unwrap();
        env::set_var("TELLURIO_BACKEND_WS_BASE_URL", "ws://localhost");
        env::set_var("TELLURIO_BACKEND_WS_PORT", "9000");
        let ep = WsEndpoint::from_env();
        assert_eq!(ep.url(), "ws://localhost:9000/ws/v0/rpc/");
        env::remove_var("TELLURIO_BACKEND_WS_BASE_URL");
        env::remove_var("TELLURIO_BACKEND_WS_PORT");
    }

    #[test]
    fn http_endpoint_builds_path() {
        let _guard = TEST_LOCK.lock().unwrap();
        env::remove_var("TELLURIO_BACKEND_HTTP_BASE_URL");
        env::remove_var("TELLURIO_BACKEND_HTTP_PORT");
        let ep = HttpEndpoint::from_env();
        assert_eq!(
            ep.url("/api/v0/verify-api-key/"),
            "https://platform.tellurio.ai:443/api/v0/verify-api-key/"
        );
    }

    #[test]
    fn keyring_config_defaults_to_tellurio_service() {
        let _guard = TEST_LOCK.lock().unwrap();
        env::remove_var("KEYRING_SERVICE_NAME");
        let cfg = KeyringConfig::from_env();
        assert_eq!(cfg.service_name, "tellurio");
        assert_eq!(cfg.entry_name, "api_key");
    }
}
