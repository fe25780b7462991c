//! Thin REST collaborator: login verification, project CRUD, and run CRUD.
//!
//! Every request authenticates with `Authorization: Api-Key <key>`; no
//! endpoint in this crate ever sends `Bearer`.

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::HttpEndpoint;
use crate::errors::TellurioError;

/// REST client for the Tellurio backend: login verification plus project
/// and run resource management.
pub struct TellurioClient {
    http: reqwest::Client,
    endpoint: HttpEndpoint,
    api_key: String,
}

impl TellurioClient {
    pub fn new(endpoint: HttpEndpoint, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key: api_key.into(),
        }
    }

    pub fn from_env(api_key: impl Into<String>) -> Self {
        Self::new(HttpEndpoint::from_env(), api_key)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, TellurioError> {
        let url = self.endpoint.url(path);
        let mut req = self
            .http
            .request(method, &url)
            .header("Authorization", format!("Api-Key {}", self.api_key));
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send().await.map_err(|e| TellurioError::ConnectError {
            url,
            reason: e.to_string(),
        })
    }

    /// `GET /api/v0/verify-api-key/`. Returns the account email on success;
    /// `InvalidCredential` on 401 or any non-200 response.
    pub async fn verify_api_key(&self) -> Result<VerifyResponse, TellurioError> {
        let response = self
            .request(Method::GET, "/api/v0/verify-api-key/", None)
            .await?;
        match response.status() {
            StatusCode::OK => response
                .json::<VerifyResponse>()
                .await
                .map_err(|e| TellurioError::protocol(format!("malformed verify response: {e}"))),
            StatusCode::UNAUTHORIZED => Err(TellurioError::InvalidCredential {
                reason: "API key is invalid".to_string(),
            }),
            other => Err(TellurioError::InvalidCredential {
                reason: format!("unexpected verify-api-key status: {other}"),
            }),
        }
    }

    /// `GET /api/v0/{namespace}/projects/{project_slug}/`.
    pub async fn get_project(
        &self,
        namespace_slug: &str,
        project_slug: &str,
    ) -> Result<Project, TellurioError> {
        let path = format!("/api/v0/{namespace_slug}/projects/{project_slug}/");
        let response = self.request(Method::GET, &path, None).await?;
        if response.status() != StatusCode::OK {
            return Err(TellurioError::lookup("project", project_slug));
        }
        response
            .json()
            .await
            .map_err(|e| TellurioError::protocol(format!("malformed project response: {e}")))
    }

    /// `POST /api/v0/{namespace}/projects/`.
    pub async fn create_project(
        &self,
        namespace_slug: &str,
        display_name: &str,
        visibility: ProjectVisibility,
    ) -> Result<Project, TellurioError> {
        let path = format!("/api/v0/{namespace_slug}/projects/");
        let body = serde_json::json!({
            "display_name": display_name,
            "visibility": visibility,
        });
        let response = self.request(Method::POST, &path, Some(&body)).await?;
        if response.status() != StatusCode::CREATED {
            return Err(TellurioError::protocol(format!(
                "failed to create project {display_name:?}: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| TellurioError::protocol(format!("malformed project response: {e}")))
    }

    /// `POST /api/v0/{namespace}/projects/{project_slug}/runs/`.
    pub async fn create_run(
        &self,
        namespace_slug: &str,
        project_slug: &str,
        request: &CreateRunRequest,
    ) -> Result<RunRecord, TellurioError> {
        let path = format!("/api/v0/{namespace_slug}/projects/{project_slug}/runs/");
        let body = serde_json::to_value(request)
            .map_err(|e| TellurioError::protocol(format!("invalid run request: {e}")))?;
        let response = self.request(Method::POST, &path, Some(&body)).await?;
        if response.status() != StatusCode::CREATED {
            return Err(TellurioError::protocol(format!(
                "failed to create run: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| TellurioError::protocol(format!("malformed run response: {e}")))
    }

    /// `PATCH /api/v0/{namespace}/projects/{project_slug}/runs/{uuid}/`.
    pub async fn patch_run_status(
        &self,
        namespace_slug: &str,
        project_slug: &str,
        run_uuid: &str,
        status: RunStatus,
    ) -> Result<(), TellurioError> {
        let path = format!("/api/v0/{namespace_slug}/projects/{project_slug}/runs/{run_uuid}/");
        let body = serde_json::json!({ "status": status });
        let response = self.request(Method::PATCH, &path, Some(&body)).await?;
        if response.status() != StatusCode::OK {
            return Err(TellurioError::protocol(format!(
                "failed to patch run {run_uuid}: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct VerifyResponse {
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectVisibility {
    Public,
    Restricted,
    Private,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Project {
    pub uuid: String,
    pub display_name: String,
    pub slug: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Crashed,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct CreateRunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RunRecord {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub status: RunStatus,
    pub date_created: String,
    pub date_updated: String,
    pub project: Project,
    pub user: RunUser,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RunUser {
    pub uuid: String,
    pub username: String,
    pub slug: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_visibility_serializes_uppercase() {
        assert_eq!(
            serde_json::to_value(ProjectVisibility::Restricted).unwrap(),
            serde_json::json!("RESTRICTED")
        );
    }

    #[test]
    fn create_run_request_omits_unset_fields() {
        let req = CreateRunRequest::default();
        assert_eq!(serde_json::to_value(&req).unwrap(), serde_json::json!({}));
    }

    #[test]
    fn run_status_round_trips_through_json() {
        let value = serde_json::to_value(RunStatus::Completed).unwrap();
        assert_eq!(value, serde_json::json!("COMPLETED"));
        let back: RunStatus = serde_json::from_value(value).unwrap();
        assert_eq!(back, RunStatus::Completed);
    }
}
