//! Neon serverless Postgres: project, branch and database stages.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::http::{ApiClient, Auth};
use super::{kinds, HttpConfig, NeonConfig};
use crate::context::{ProvisioningContext, TenantIdentity};
use crate::core::{fields, ResourceHandle, StageOutcome};
use crate::credentials::Secret;
use crate::errors::ProvisionError;
use crate::polling::{PollSpec, Poller, ProbeResult};
use crate::stages::Stage;

/// Name of the branch the tenant's application runs on.
pub const APP_BRANCH: &str = "app";

/// Extra handle fields recorded by the Neon stages.
pub mod extra {
    /// Project the resource lives in.
    pub const PROJECT_ID: &str = "project_id";
    /// Branch the resource lives in.
    pub const BRANCH_ID: &str = "branch_id";
    /// The project's default branch.
    pub const DEFAULT_BRANCH_ID: &str = "default_branch_id";
    /// Role owning new databases.
    pub const OWNER_ROLE: &str = "owner_role";
    /// Compute endpoint serving a branch.
    pub const ENDPOINT_ID: &str = "endpoint_id";
    /// Project region.
    pub const REGION: &str = "region";
}

/// Deterministic Neon project name for a tenant.
#[must_use]
pub fn project_name(tenant: &TenantIdentity) -> String {
    format!("tenant-{}", tenant.name)
}

/// Deterministic database name for a tenant.
#[must_use]
pub fn database_name(tenant: &TenantIdentity) -> String {
    tenant.slug()
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NeonProject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub region_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectList {
    #[serde(default)]
    pub projects: Vec<NeonProject>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectEnvelope {
    pub project: NeonProject,
    #[serde(default)]
    pub branch: Option<NeonBranch>,
    #[serde(default)]
    pub roles: Vec<NeonRole>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NeonBranch {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub default: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchList {
    #[serde(default)]
    pub branches: Vec<NeonBranch>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchEnvelope {
    pub branch: NeonBranch,
    #[serde(default)]
    pub endpoints: Vec<NeonEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NeonEndpoint {
    pub id: String,
    pub host: String,
    #[serde(rename = "type", default)]
    pub endpoint_type: String,
    #[serde(default)]
    pub current_state: String,
}

impl NeonEndpoint {
    /// Idle endpoints are suspended computes that wake on connect.
    pub fn is_ready(&self) -> bool {
        matches!(self.current_state.as_str(), "active" | "idle")
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct EndpointEnvelope {
    pub endpoint: NeonEndpoint,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EndpointList {
    #[serde(default)]
    pub endpoints: Vec<NeonEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NeonRole {
    pub name: String,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RoleList {
    #[serde(default)]
    pub roles: Vec<NeonRole>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NeonDatabase {
    pub name: String,
    pub owner_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatabaseEnvelope {
    pub database: NeonDatabase,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DatabaseList {
    #[serde(default)]
    pub databases: Vec<NeonDatabase>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NeonOperation {
    #[serde(default)]
    pub action: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OperationList {
    #[serde(default)]
    pub operations: Vec<NeonOperation>,
}

#[derive(Debug, Deserialize)]
struct RevealedPassword {
    password: String,
}

/// Operations still holding the project lock.
pub(crate) fn pending_operations(list: &OperationList) -> Vec<&NeonOperation> {
    list.operations
        .iter()
        .filter(|op| matches!(op.status.as_str(), "scheduling" | "running" | "cancelling"))
        .collect()
}

/// The first role a tenant database can be owned by.
pub(crate) fn select_owner_role(roles: &[NeonRole]) -> Option<&NeonRole> {
    roles.iter().find(|r| !r.protected)
}

/// Client for the Neon API, shared by the Neon stages and the bootstrap
/// stage.
#[derive(Debug, Clone)]
pub struct NeonClient {
    api: ApiClient,
    config: NeonConfig,
    poller: Poller,
}

impl NeonClient {
    /// Creates a client.
    pub fn new(config: NeonConfig, http: &HttpConfig, poller: Poller) -> Result<Self, ProvisionError> {
        let api = ApiClient::new(config.base_url.clone(), Auth::Bearer(config.api_key.clone()), http)?;
        Ok(Self { api, config, poller })
    }

    fn poll_spec(&self, label: String) -> PollSpec {
        PollSpec::new(label, self.config.poll.clone())
    }

    pub(crate) async fn find_project(
        &self,
        ctx: &ProvisioningContext,
        name: &str,
    ) -> Result<Option<NeonProject>, ProvisionError> {
        let list: ProjectList = self
            .api
            .get_json(ctx.cancel_scope(), &format!("/projects?search={name}"))
            .await?;
        Ok(list.projects.into_iter().find(|p| p.name == name))
    }

    pub(crate) async fn create_project(
        &self,
        ctx: &ProvisioningContext,
        name: &str,
    ) -> Result<ProjectEnvelope, ProvisionError> {
        let body = json!({
            "project": {
                "name": name,
                "region_id": self.config.region_id,
                "pg_version": self.config.pg_version,
            }
        });
        self.api.post_json(ctx.cancel_scope(), "/projects", &body).await
    }

    pub(crate) async fn branches(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
    ) -> Result<Vec<NeonBranch>, ProvisionError> {
        let list: BranchList = self
            .api
            .get_json(ctx.cancel_scope(), &format!("/projects/{project_id}/branches"))
            .await?;
        Ok(list.branches)
    }

    pub(crate) async fn owner_role(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        branch_id: &str,
    ) -> Result<String, ProvisionError> {
        let list: RoleList = self
            .api
            .get_json(
                ctx.cancel_scope(),
                &format!("/projects/{project_id}/branches/{branch_id}/roles"),
            )
            .await?;
        select_owner_role(&list.roles)
            .map(|r| r.name.clone())
            .ok_or_else(|| ProvisionError::permanent(format!("project {project_id} has no usable owner role")))
    }

    /// Waits until no operation holds the project lock.
    ///
    /// Neon rejects writes with 423 while a project operation is running,
    /// which is the normal state right after project or branch creation.
    pub(crate) async fn await_idle(&self, ctx: &ProvisioningContext, project_id: &str) -> Result<(), ProvisionError> {
        let spec = self.poll_spec(format!("neon project {project_id} operations"));
        let path = format!("/projects/{project_id}/operations");
        let (api, path) = (&self.api, path.as_str());
        self.poller
            .await_ready(&spec, ctx, move || async move {
                match api.get_json::<OperationList>(ctx.cancel_scope(), path).await {
                    Ok(list) => {
                        let pending = pending_operations(&list);
                        if pending.is_empty() {
                            ProbeResult::Ready(())
                        } else {
                            let actions: Vec<&str> = pending.iter().map(|op| op.action.as_str()).collect();
                            ProbeResult::NotReady(format!("operations in progress: {}", actions.join(", ")))
                        }
                    }
                    Err(err) => ProbeResult::Error(err),
                }
            })
            .await
    }

    pub(crate) async fn create_branch(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        name: &str,
    ) -> Result<BranchEnvelope, ProvisionError> {
        let body = json!({
            "branch": { "name": name },
            "endpoints": [{ "type": "read_write" }],
        });
        self.api
            .post_json(ctx.cancel_scope(), &format!("/projects/{project_id}/branches"), &body)
            .await
    }

    pub(crate) async fn read_write_endpoint(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        branch_id: &str,
    ) -> Result<Option<NeonEndpoint>, ProvisionError> {
        let list: EndpointList = self
            .api
            .get_json(
                ctx.cancel_scope(),
                &format!("/projects/{project_id}/branches/{branch_id}/endpoints"),
            )
            .await?;
        Ok(list.endpoints.into_iter().find(|e| e.endpoint_type == "read_write"))
    }

    /// Polls an endpoint until its compute is up.
    pub(crate) async fn await_endpoint(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        endpoint_id: &str,
    ) -> Result<NeonEndpoint, ProvisionError> {
        let spec = self.poll_spec(format!("neon endpoint {endpoint_id}"));
        let path = format!("/projects/{project_id}/endpoints/{endpoint_id}");
        let (api, path) = (&self.api, path.as_str());
        self.poller
            .await_ready(&spec, ctx, move || async move {
                match api.get_json::<EndpointEnvelope>(ctx.cancel_scope(), path).await {
                    Ok(env) if env.endpoint.is_ready() => ProbeResult::Ready(env.endpoint),
                    Ok(env) => ProbeResult::NotReady(format!("endpoint state '{}'", env.endpoint.current_state)),
                    Err(err) => ProbeResult::Error(err),
                }
            })
            .await
    }

    pub(crate) async fn find_database(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        branch_id: &str,
        name: &str,
    ) -> Result<Option<NeonDatabase>, ProvisionError> {
        let list: DatabaseList = self
            .api
            .get_json(
                ctx.cancel_scope(),
                &format!("/projects/{project_id}/branches/{branch_id}/databases"),
            )
            .await?;
        Ok(list.databases.into_iter().find(|d| d.name == name))
    }

    pub(crate) async fn create_database(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        branch_id: &str,
        name: &str,
        owner: &str,
    ) -> Result<NeonDatabase, ProvisionError> {
        let body = json!({ "database": { "name": name, "owner_name": owner } });
        let envelope: DatabaseEnvelope = self
            .api
            .post_json(
                ctx.cancel_scope(),
                &format!("/projects/{project_id}/branches/{branch_id}/databases"),
                &body,
            )
            .await?;
        Ok(envelope.database)
    }

    /// Reads the current password of a role.
    pub(crate) async fn reveal_password(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        branch_id: &str,
        role: &str,
    ) -> Result<Secret, ProvisionError> {
        let revealed: RevealedPassword = self
            .api
            .get_json(
                ctx.cancel_scope(),
                &format!("/projects/{project_id}/branches/{branch_id}/roles/{role}/reveal_password"),
            )
            .await?;
        Ok(Secret::new(revealed.password))
    }
}

/// Creates (or adopts) the tenant's Neon project.
#[derive(Debug, Clone)]
pub struct CreateProjectStage {
    neon: Arc<NeonClient>,
}

impl CreateProjectStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(neon: Arc<NeonClient>) -> Self {
        Self { neon }
    }

    async fn create(&self, ctx: &ProvisioningContext) -> Result<ResourceHandle, ProvisionError> {
        let name = project_name(ctx.tenant());
        let envelope = self.neon.create_project(ctx, &name).await?;
        let project = envelope.project;

        let default_branch = match envelope.branch {
            Some(branch) => branch.id,
            None => default_branch_id(&self.neon.branches(ctx, &project.id).await?, &project.id)?,
        };
        let owner = match select_owner_role(&envelope.roles) {
            Some(role) => role.name.clone(),
            None => self.neon.owner_role(ctx, &project.id, &default_branch).await?,
        };

        Ok(project_handle(&project, &default_branch, &owner))
    }
}

fn default_branch_id(branches: &[NeonBranch], project_id: &str) -> Result<String, ProvisionError> {
    branches
        .iter()
        .find(|b| b.default)
        .or_else(|| branches.first())
        .map(|b| b.id.clone())
        .ok_or_else(|| ProvisionError::permanent(format!("project {project_id} has no branches")))
}

fn project_handle(project: &NeonProject, default_branch: &str, owner: &str) -> ResourceHandle {
    ResourceHandle::with_id(project.id.clone())
        .with(fields::NAME, project.name.clone())
        .with(extra::REGION, project.region_id.clone())
        .with(extra::DEFAULT_BRANCH_ID, default_branch)
        .with(extra::OWNER_ROLE, owner)
}

#[async_trait]
impl Stage for CreateProjectStage {
    fn name(&self) -> &str {
        "create-project"
    }

    fn resource_kind(&self) -> &str {
        kinds::PROJECT
    }

    async fn discover(&self, ctx: &ProvisioningContext) -> Result<Option<ResourceHandle>, ProvisionError> {
        let Some(project) = self.neon.find_project(ctx, &project_name(ctx.tenant())).await? else {
            return Ok(None);
        };
        let default_branch = default_branch_id(&self.neon.branches(ctx, &project.id).await?, &project.id)?;
        let owner = self.neon.owner_role(ctx, &project.id, &default_branch).await?;
        Ok(Some(project_handle(&project, &default_branch, &owner)))
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        self.create(ctx).await.into()
    }
}

/// Creates the application branch with a read-write endpoint and waits for
/// the endpoint to come up.
#[derive(Debug, Clone)]
pub struct CreateBranchStage {
    neon: Arc<NeonClient>,
}

impl CreateBranchStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(neon: Arc<NeonClient>) -> Self {
        Self { neon }
    }

    async fn create(&self, ctx: &ProvisioningContext) -> Result<ResourceHandle, ProvisionError> {
        let project_id = ctx.require(kinds::PROJECT, fields::ID)?;

        self.neon.await_idle(ctx, project_id).await?;
        let envelope = self.neon.create_branch(ctx, project_id, APP_BRANCH).await?;
        let endpoint = envelope
            .endpoints
            .iter()
            .find(|e| e.endpoint_type == "read_write")
            .or_else(|| envelope.endpoints.first())
            .ok_or_else(|| ProvisionError::permanent("branch was created without an endpoint"))?;

        let endpoint = self.neon.await_endpoint(ctx, project_id, &endpoint.id).await?;
        Ok(branch_handle(project_id, &envelope.branch, &endpoint))
    }
}

fn branch_handle(project_id: &str, branch: &NeonBranch, endpoint: &NeonEndpoint) -> ResourceHandle {
    ResourceHandle::with_id(branch.id.clone())
        .with(fields::NAME, branch.name.clone())
        .with(fields::HOST, endpoint.host.clone())
        .with(extra::PROJECT_ID, project_id)
        .with(extra::ENDPOINT_ID, endpoint.id.clone())
}

#[async_trait]
impl Stage for CreateBranchStage {
    fn name(&self) -> &str {
        "create-branch"
    }

    fn resource_kind(&self) -> &str {
        kinds::BRANCH
    }

    async fn discover(&self, ctx: &ProvisioningContext) -> Result<Option<ResourceHandle>, ProvisionError> {
        let project_id = ctx.require(kinds::PROJECT, fields::ID)?;
        let branches = self.neon.branches(ctx, project_id).await?;
        let Some(branch) = branches.into_iter().find(|b| b.name == APP_BRANCH) else {
            return Ok(None);
        };
        let endpoint = self
            .neon
            .read_write_endpoint(ctx, project_id, &branch.id)
            .await?
            .ok_or_else(|| {
                ProvisionError::permanent(format!("branch {} exists without a read-write endpoint", branch.id))
            })?;
        Ok(Some(branch_handle(project_id, &branch, &endpoint)))
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        self.create(ctx).await.into()
    }
}

/// Creates the tenant database on the application branch, owned by the
/// project's owner role.
#[derive(Debug, Clone)]
pub struct CreateDatabaseStage {
    neon: Arc<NeonClient>,
}

impl CreateDatabaseStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(neon: Arc<NeonClient>) -> Self {
        Self { neon }
    }

    fn handle(ctx: &ProvisioningContext, database: &NeonDatabase) -> Result<ResourceHandle, ProvisionError> {
        Ok(ResourceHandle::new()
            .with(fields::NAME, database.name.clone())
            .with(fields::DATABASE, database.name.clone())
            .with(fields::HOST, ctx.require(kinds::BRANCH, fields::HOST)?)
            .with(extra::OWNER_ROLE, database.owner_name.clone())
            .with(extra::PROJECT_ID, ctx.require(kinds::PROJECT, fields::ID)?)
            .with(extra::BRANCH_ID, ctx.require(kinds::BRANCH, fields::ID)?))
    }

    async fn create(&self, ctx: &ProvisioningContext) -> Result<ResourceHandle, ProvisionError> {
        let project_id = ctx.require(kinds::PROJECT, fields::ID)?;
        let branch_id = ctx.require(kinds::BRANCH, fields::ID)?;
        let owner = ctx.require(kinds::PROJECT, extra::OWNER_ROLE)?;
        let name = database_name(ctx.tenant());

        self.neon.await_idle(ctx, project_id).await?;
        let database = self
            .neon
            .create_database(ctx, project_id, branch_id, &name, owner)
            .await?;
        Self::handle(ctx, &database)
    }
}

#[async_trait]
impl Stage for CreateDatabaseStage {
    fn name(&self) -> &str {
        "create-database"
    }

    fn resource_kind(&self) -> &str {
        kinds::DATABASE
    }

    async fn discover(&self, ctx: &ProvisioningContext) -> Result<Option<ResourceHandle>, ProvisionError> {
        let project_id = ctx.require(kinds::PROJECT, fields::ID)?;
        let branch_id = ctx.require(kinds::BRANCH, fields::ID)?;
        let name = database_name(ctx.tenant());

        match self.neon.find_database(ctx, project_id, branch_id, &name).await? {
            Some(database) => Self::handle(ctx, &database).map(Some),
            None => Ok(None),
        }
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        self.create(ctx).await.into()
    }
}
