//! Waits for the deployed backend to answer HTTP.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::http::{ApiClient, Auth};
use super::{kinds, HttpConfig, ReadinessConfig};
use crate::context::ProvisioningContext;
use crate::core::{fields, Criticality, ResourceHandle, StageOutcome};
use crate::errors::ProvisionError;
use crate::polling::{PollSpec, Poller, ProbeResult};
use crate::stages::Stage;

/// Handle field holding the status of the first healthy answer.
pub const STATUS: &str = "status";

/// Whether a backend answer means it is serving.
#[must_use]
pub fn is_serving(status: StatusCode) -> bool {
    status.is_success() || status.is_redirection()
}

/// Polls the backend URL until it answers with 2xx or 3xx.
#[derive(Debug, Clone)]
pub struct AwaitBackendStage {
    api: ApiClient,
    config: ReadinessConfig,
    poller: Poller,
}

impl AwaitBackendStage {
    /// Creates the stage.
    pub fn new(config: ReadinessConfig, http: &HttpConfig, poller: Poller) -> Result<Self, ProvisionError> {
        let api = ApiClient::new("", Auth::None, http)?;
        Ok(Self { api, config, poller })
    }

    async fn wait(&self, ctx: &ProvisioningContext, base: &str) -> Result<ResourceHandle, ProvisionError> {
        let url = format!("{}{}", base.trim_end_matches('/'), self.config.path);
        let spec = PollSpec::new(format!("backend {url}"), self.config.poll.clone());

        let (api, target) = (&self.api, url.as_str());
        let status = self
            .poller
            .await_ready(&spec, ctx, move || async move {
                match api.probe_status(ctx.cancel_scope(), target).await {
                    Ok(status) if is_serving(status) => ProbeResult::Ready(status),
                    Ok(status) => ProbeResult::NotReady(format!("HTTP {}", status.as_u16())),
                    Err(err) => ProbeResult::Error(err),
                }
            })
            .await?;

        Ok(ResourceHandle::new()
            .with(fields::URL, url)
            .with(STATUS, status.as_u16().to_string()))
    }
}

#[async_trait]
impl Stage for AwaitBackendStage {
    fn name(&self) -> &str {
        "await-backend"
    }

    fn resource_kind(&self) -> &str {
        kinds::BACKEND_READY
    }

    fn criticality(&self) -> Criticality {
        Criticality::NonFatal
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        let Some(base) = ctx.resource(kinds::BACKEND).and_then(|h| h.get(fields::URL)) else {
            return StageOutcome::skipped("no backend deployed");
        };
        self.wait(ctx, base).await.into()
    }
}
