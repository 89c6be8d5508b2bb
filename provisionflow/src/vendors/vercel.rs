//! Vercel frontend project.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{ApiClient, Auth};
use super::{kinds, HttpConfig, VercelConfig};
use crate::context::{ProvisioningContext, TenantIdentity};
use crate::core::{fields, Criticality, ResourceHandle, StageOutcome};
use crate::errors::ProvisionError;
use crate::stages::Stage;

/// Environment variable pointing the frontend at the backend.
pub const API_URL_VAR: &str = "NEXT_PUBLIC_API_URL";

/// Handle field for the custom domain attached to the project.
pub const DOMAIN: &str = "domain";

/// Deterministic Vercel project name for a tenant.
#[must_use]
pub fn project_name(tenant: &TenantIdentity) -> String {
    format!("frontend-{}", tenant.name)
}

/// Reduces a repository URL to the `owner/repo` form Vercel expects.
#[must_use]
pub fn repo_slug(repo: &str) -> String {
    let trimmed = repo.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
    ["https://github.com/", "http://github.com/", "github.com/"]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed)
        .to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VercelProject {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ProjectDomain {
    name: String,
}

/// Creates the frontend project from a repository, points it at the backend
/// and attaches the tenant domain when one is set.
///
/// An existing project is reused, but the env upsert and domain attach run on
/// every execution so a half-wired project from an earlier run is completed.
#[derive(Debug, Clone)]
pub struct DeployFrontendStage {
    api: ApiClient,
    config: VercelConfig,
}

impl DeployFrontendStage {
    /// Creates the stage.
    pub fn new(config: VercelConfig, http: &HttpConfig) -> Result<Self, ProvisionError> {
        let api = ApiClient::new(config.base_url.clone(), Auth::Bearer(config.token.clone()), http)?;
        Ok(Self { api, config })
    }

    /// Appends the team scope to a path.
    fn scoped(&self, path: &str) -> String {
        match &self.config.team_id {
            Some(team) => {
                let sep = if path.contains('?') { '&' } else { '?' };
                format!("{path}{sep}teamId={team}")
            }
            None => path.to_string(),
        }
    }

    fn handle(project: &VercelProject, domain: Option<&str>) -> ResourceHandle {
        ResourceHandle::with_id(project.id.clone())
            .with(fields::NAME, project.name.clone())
            .with(fields::URL, format!("https://{}.vercel.app", project.name))
            .with_opt(DOMAIN, domain)
    }

    async fn attach_domain(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        domain: &str,
    ) -> Result<(), ProvisionError> {
        let existing: Option<ProjectDomain> = self
            .api
            .get_json_opt(
                ctx.cancel_scope(),
                &self.scoped(&format!("/v9/projects/{project_id}/domains/{domain}")),
            )
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        let attached: ProjectDomain = self
            .api
            .post_json(
                ctx.cancel_scope(),
                &self.scoped(&format!("/v10/projects/{project_id}/domains")),
                &json!({ "name": domain }),
            )
            .await?;
        tracing::debug!(domain = %attached.name, "Attached domain to frontend");
        Ok(())
    }

    async fn find_project(&self, ctx: &ProvisioningContext) -> Result<Option<VercelProject>, ProvisionError> {
        let path = self.scoped(&format!("/v9/projects/{}", project_name(ctx.tenant())));
        self.api.get_json_opt(ctx.cancel_scope(), &path).await
    }

    async fn ensure_project(&self, ctx: &ProvisioningContext) -> Result<VercelProject, ProvisionError> {
        if let Some(project) = self.find_project(ctx).await? {
            tracing::debug!(project = %project.name, "Reusing frontend project");
            return Ok(project);
        }

        let body = json!({
            "name": project_name(ctx.tenant()),
            "framework": self.config.framework,
            "gitRepository": { "type": "github", "repo": repo_slug(&self.config.frontend_repo) },
        });
        self.api
            .post_json(ctx.cancel_scope(), &self.scoped("/v9/projects"), &body)
            .await
    }

    async fn deploy(&self, ctx: &ProvisioningContext, backend_url: &str) -> Result<ResourceHandle, ProvisionError> {
        let project = self.ensure_project(ctx).await?;

        let env = json!({
            "key": API_URL_VAR,
            "value": backend_url,
            "type": "plain",
            "target": ["production", "preview"],
        });
        let _: Value = self
            .api
            .post_json(
                ctx.cancel_scope(),
                &self.scoped(&format!("/v10/projects/{}/env?upsert=true", project.id)),
                &env,
            )
            .await?;

        let domain = ctx.tenant().domain.as_deref();
        if let Some(domain) = domain {
            self.attach_domain(ctx, &project.id, domain).await?;
        }

        Ok(Self::handle(&project, domain))
    }
}

#[async_trait]
impl Stage for DeployFrontendStage {
    fn name(&self) -> &str {
        "deploy-frontend"
    }

    fn resource_kind(&self) -> &str {
        kinds::FRONTEND
    }

    fn criticality(&self) -> Criticality {
        Criticality::NonFatal
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        let Some(backend_url) = ctx.resource(kinds::BACKEND).and_then(|h| h.get(fields::URL)) else {
            return StageOutcome::skipped("no backend URL to point the frontend at");
        };
        self.deploy(ctx, backend_url).await.into()
    }
}
