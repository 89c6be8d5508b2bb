//! Railway backend deployment over the GraphQL API.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::http::{ApiClient, Auth};
use super::{kinds, HttpConfig, RailwayConfig};
use crate::context::{ProvisioningContext, TenantIdentity};
use crate::core::{fields, ConnectionDescriptor, Criticality, ResourceHandle, StageOutcome};
use crate::errors::ProvisionError;
use crate::stages::Stage;

/// Service name inside the tenant's Railway project.
pub const SERVICE_NAME: &str = "backend";

/// Variable carrying the tenant connection string.
pub const DATABASE_URL: &str = "DATABASE_URL";

/// Extra handle fields recorded by the backend stage.
pub mod extra {
    /// Deployment environment.
    pub const ENVIRONMENT_ID: &str = "environment_id";
    /// Deployed service.
    pub const SERVICE_ID: &str = "service_id";
}

const PROJECTS_QUERY: &str = "query { projects { edges { node { id name \
    environments { edges { node { id name } } } services { edges { node { id name } } } } } } }";

const PROJECT_CREATE: &str = "mutation($input: ProjectCreateInput!) { projectCreate(input: $input) { id name \
    environments { edges { node { id name } } } services { edges { node { id name } } } } }";

const SERVICE_CREATE: &str = "mutation($input: ServiceCreateInput!) { serviceCreate(input: $input) { id name } }";

const VARIABLE_UPSERT: &str = "mutation($input: VariableUpsertInput!) { variableUpsert(input: $input) }";

const DOMAINS_QUERY: &str = "query($projectId: String!, $environmentId: String!, $serviceId: String!) { \
    domains(projectId: $projectId, environmentId: $environmentId, serviceId: $serviceId) { serviceDomains { domain } } }";

const DOMAIN_CREATE: &str =
    "mutation($input: ServiceDomainCreateInput!) { serviceDomainCreate(input: $input) { domain } }";

/// Deterministic Railway project name for a tenant.
#[must_use]
pub fn project_name(tenant: &TenantIdentity) -> String {
    format!("backend-{}", tenant.name)
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// A Relay-style connection.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Connection<T> {
    #[serde(default = "Vec::new")]
    pub edges: Vec<Edge<T>>,
}

impl<T> Connection<T> {
    pub fn nodes(&self) -> impl Iterator<Item = &T> {
        self.edges.iter().map(|e| &e.node)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Edge<T> {
    pub node: T,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Named {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RailwayProject {
    pub id: String,
    pub name: String,
    pub environments: Connection<Named>,
    pub services: Connection<Named>,
}

impl RailwayProject {
    /// The `production` environment, or the first one.
    pub fn environment(&self) -> Option<&Named> {
        self.environments
            .nodes()
            .find(|e| e.name == "production")
            .or_else(|| self.environments.nodes().next())
    }

    pub fn service(&self, name: &str) -> Option<&Named> {
        self.services.nodes().find(|s| s.name == name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectsData {
    projects: Connection<RailwayProject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectCreateData {
    project_create: RailwayProject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceCreateData {
    service_create: Named,
}

#[derive(Debug, Deserialize)]
struct Domain {
    domain: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceDomains {
    service_domains: Vec<Domain>,
}

#[derive(Debug, Deserialize)]
struct DomainsData {
    domains: ServiceDomains,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DomainCreateData {
    service_domain_create: Domain,
}

/// Unwraps a GraphQL response. Any reported error is permanent: Railway
/// reports rate limits through the HTTP status, which the client already
/// classified.
fn into_data<T>(operation: &str, response: GraphQlResponse<T>) -> Result<T, ProvisionError> {
    if let Some(first) = response.errors.first() {
        return Err(ProvisionError::permanent(format!("railway {operation}: {}", first.message)));
    }
    response
        .data
        .ok_or_else(|| ProvisionError::permanent(format!("railway {operation}: response carried no data")))
}

/// Deploys the tenant backend from a repository and wires it to the
/// tenant database.
///
/// Every step is find-or-create, so re-running converges on one project,
/// one service and one domain, with `DATABASE_URL` always set to the
/// current credentials.
#[derive(Debug, Clone)]
pub struct DeployBackendStage {
    api: ApiClient,
    config: RailwayConfig,
}

impl DeployBackendStage {
    /// Creates the stage.
    pub fn new(config: RailwayConfig, http: &HttpConfig) -> Result<Self, ProvisionError> {
        let api = ApiClient::new(config.endpoint.clone(), Auth::Bearer(config.api_key.clone()), http)?;
        Ok(Self { api, config })
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        ctx: &ProvisioningContext,
        operation: &str,
        query: &str,
        variables: Value,
    ) -> Result<T, ProvisionError> {
        let body = json!({ "query": query, "variables": variables });
        let response: GraphQlResponse<T> = self.api.post_json(ctx.cancel_scope(), "", &body).await?;
        into_data(operation, response)
    }

    async fn find_project(
        &self,
        ctx: &ProvisioningContext,
        name: &str,
    ) -> Result<Option<RailwayProject>, ProvisionError> {
        let data: ProjectsData = self.graphql(ctx, "projects", PROJECTS_QUERY, json!({})).await?;
        Ok(data.projects.edges.into_iter().map(|e| e.node).find(|p| p.name == name))
    }

    async fn ensure_project(&self, ctx: &ProvisioningContext) -> Result<RailwayProject, ProvisionError> {
        let name = project_name(ctx.tenant());
        if let Some(project) = self.find_project(ctx, &name).await? {
            tracing::debug!(project = %project.id, "Reusing Railway project");
            return Ok(project);
        }
        let data: ProjectCreateData = self
            .graphql(ctx, "projectCreate", PROJECT_CREATE, json!({ "input": { "name": name } }))
            .await?;
        Ok(data.project_create)
    }

    async fn ensure_service(
        &self,
        ctx: &ProvisioningContext,
        project: &RailwayProject,
    ) -> Result<String, ProvisionError> {
        if let Some(service) = project.service(SERVICE_NAME) {
            return Ok(service.id.clone());
        }
        let input = json!({
            "input": {
                "projectId": project.id,
                "name": SERVICE_NAME,
                "source": { "repo": self.config.backend_repo },
            }
        });
        let data: ServiceCreateData = self.graphql(ctx, "serviceCreate", SERVICE_CREATE, input).await?;
        Ok(data.service_create.id)
    }

    async fn ensure_domain(
        &self,
        ctx: &ProvisioningContext,
        project_id: &str,
        environment_id: &str,
        service_id: &str,
    ) -> Result<String, ProvisionError> {
        let vars = json!({ "projectId": project_id, "environmentId": environment_id, "serviceId": service_id });
        let data: DomainsData = self.graphql(ctx, "domains", DOMAINS_QUERY, vars).await?;
        if let Some(existing) = data.domains.service_domains.into_iter().next() {
            return Ok(existing.domain);
        }

        let input = json!({ "input": { "environmentId": environment_id, "serviceId": service_id } });
        let data: DomainCreateData = self
            .graphql(ctx, "serviceDomainCreate", DOMAIN_CREATE, input)
            .await?;
        Ok(data.service_domain_create.domain)
    }

    async fn deploy(&self, ctx: &ProvisioningContext) -> Result<ResourceHandle, ProvisionError> {
        let database_url = ctx
            .resource(kinds::USER)
            .and_then(ConnectionDescriptor::from_handle)
            .ok_or_else(|| ProvisionError::permanent("no database credentials recorded for the backend"))?;

        let project = self.ensure_project(ctx).await?;
        let environment = project
            .environment()
            .ok_or_else(|| ProvisionError::permanent(format!("railway project {} has no environment", project.id)))?
            .id
            .clone();
        let service_id = self.ensure_service(ctx, &project).await?;

        let upsert = json!({
            "input": {
                "projectId": project.id,
                "environmentId": environment,
                "serviceId": service_id,
                "name": DATABASE_URL,
                "value": database_url.to_string(),
            }
        });
        let _: Value = self.graphql(ctx, "variableUpsert", VARIABLE_UPSERT, upsert).await?;

        let domain = self.ensure_domain(ctx, &project.id, &environment, &service_id).await?;

        Ok(ResourceHandle::with_id(project.id.clone())
            .with(fields::NAME, project.name.clone())
            .with(fields::URL, format!("https://{domain}"))
            .with(extra::ENVIRONMENT_ID, environment)
            .with(extra::SERVICE_ID, service_id))
    }
}

#[async_trait]
impl Stage for DeployBackendStage {
    fn name(&self) -> &str {
        "deploy-backend"
    }

    fn resource_kind(&self) -> &str {
        kinds::BACKEND
    }

    fn criticality(&self) -> Criticality {
        Criticality::NonFatal
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        self.deploy(ctx).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::testing::fixtures;

    #[test]
    fn test_project_name() {
        assert_eq!(project_name(&fixtures::tenant("acme")), "backend-acme");
    }

    #[test]
    fn test_graphql_errors_are_permanent() {
        let response: GraphQlResponse<ProjectsData> =
            serde_json::from_str(r#"{"data": null, "errors": [{"message": "Not Authorized"}]}"#).unwrap();

        let err = into_data("projects", response).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.message().contains("Not Authorized"));
    }

    #[test]
    fn test_parse_project_listing() {
        let body = r#"{"data": {"projects": {"edges": [
            {"node": {"id": "p-1", "name": "backend-acme",
                "environments": {"edges": [
                    {"node": {"id": "env-stg", "name": "staging"}},
                    {"node": {"id": "env-prod", "name": "production"}}
                ]},
                "services": {"edges": [{"node": {"id": "svc-1", "name": "backend"}}]}}}
        ]}}}"#;

        let response: GraphQlResponse<ProjectsData> = serde_json::from_str(body).unwrap();
        let data = into_data("projects", response).unwrap();
        let project = data.projects.nodes().next().unwrap();

        assert_eq!(project.environment().unwrap().id, "env-prod");
        assert_eq!(project.service(SERVICE_NAME).unwrap().id, "svc-1");
        assert!(project.service("worker").is_none());
    }

    #[tokio::test]
    async fn test_deploy_requires_database_credentials() {
        let stage = DeployBackendStage::new(
            RailwayConfig::new("k", "https://github.com/acme/api").with_endpoint("http://127.0.0.1:9"),
            &HttpConfig::default(),
        )
        .unwrap();

        let outcome = stage.execute(&fixtures::context("acme")).await;

        assert_eq!(stage.criticality(), Criticality::NonFatal);
        assert_eq!(outcome.error_kind(), Some(ErrorKind::Permanent));
    }
}
