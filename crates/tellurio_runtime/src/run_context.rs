//! Process-wide active-run tracking and the `Run` lifecycle.
//!
//! `init` ensures a project exists, creates a run under it, and records the
//! run's id as the process-wide active run. `Run::finish` marks the run
//! COMPLETED server-side and clears that id. Unlike the suppression/gate
//! flags in `state.rs`, the active-run id is not scoped/nested: there is at
//! most one active run per process.

use tokio::sync::RwLock;

use crate::errors::TellurioError;
use crate::rest::{CreateRunRequest, ProjectVisibility, RunStatus, TellurioClient};

static ACTIVE_RUN_UUID: RwLock<Option<String>> = RwLock::const_new(None);

pub async fn set_active_run_uuid(uuid: Option<String>) {
    *ACTIVE_RUN_UUID.write().await = uuid;
}

pub async fn active_run_uuid() -> Option<String> {
    ACTIVE_RUN_UUID.read().await.clone()
}

/// A run tracked server-side under a project, mirroring the fields the
/// backend returns from `POST .../runs/`.
#[derive(Clone, Debug)]
pub struct Run {
    pub uuid: String,
    pub name: String,
    pub description: Option<String>,
    pub status: RunStatus,
    pub date_created: String,
    pub date_updated: String,
    pub namespace_slug: String,
    pub project_slug: String,
    pub project_uuid: String,
    pub project_display_name: String,
    pub user_uuid: String,
    pub username: String,
}

impl Run {
    /// PATCH the run to COMPLETED and clear the active-run id. Idempotent:
    /// calling this again after the run is already COMPLETED re-sends the
    /// PATCH (the server accepts the repeated transition) and clears an
    /// already-unset active-run id without error.
    pub async fn finish(&mut self, client: &TellurioClient) -> Result<(), TellurioError> {
        client
            .patch_run_status(
                &self.namespace_slug,
                &self.project_slug,
                &self.uuid,
                RunStatus::Completed,
            )
            .await?;
        self.status = RunStatus::Completed;
        set_active_run_uuid(None).await;
        Ok(())
    }
}

/// Lowercase-ascii, hyphen-separated slug, mirroring the behaviour of the
/// Python `slugify` library closely enough for project/run display names.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut last_was_hyphen = true; // suppress a leading hyphen
    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Ensure a project exists (creating one with RESTRICTED visibility if
/// necessary), create a run under it, set it as the active run, and return
/// it.
pub async fn init(
    client: &TellurioClient,
    namespace_slug: &str,
    project_display_name: &str,
    name: Option<String>,
    description: Option<String>,
    status: Option<RunStatus>,
) -> Result<Run, TellurioError> {
    let project_slug = slugify(project_display_name);

    let project = match client.get_project(namespace_slug, &project_slug).await {
        Ok(project) => project,
        Err(_) => {
            client
                .create_project(
                    namespace_slug,
                    project_display_name,
                    ProjectVisibility::Restricted,
                )
                .await?
        }
    };

    let request = CreateRunRequest {
        name,
        description,
        status: status.or(Some(RunStatus::Running)),
    };
    let record = client
        .create_run(namespace_slug, &project.slug, &request)
        .await?;

    set_active_run_uuid(Some(record.uuid.clone())).await;

    Ok(Run {
        uuid: record.uuid,
        name: record.name,
        description: record.description,
        status: record.status,
        date_created: record.date_created,
        date_updated: record.date_updated,
        namespace_slug: namespace_slug.to_string(),
        project_slug: project.slug.clone(),
        project_uuid: record.project.uuid,
        project_display_name: record.project.display_name,
        user_uuid: record.user.uuid,
        username: record.user.username,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_lowercases_and_hyphenates() {
        assert_eq!(slugify("My Cool Project"), "my-cool-project");
        assert_eq!(slugify("already-slugged"), "already-slugged");
        assert_eq!(slugify("  leading and trailing  "), "leading-and-trailing");
        assert_eq!(slugify("weird__chars!!here"), "weird-chars-here");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn active_run_uuid_round_trips() {
        set_active_run_uuid(Some("run-1".to_string())).await;
        assert_eq!(active_run_uuid().await, Some("run-1".to_string()));
        set_active_run_uuid(None).await;
        assert_eq!(active_run_uuid().await, None);
    }
}
