//! `provisionflow` command-line entry point.
//!
//! Usage:
//!   provisionflow acme --domain acme.example.com
//!   provisionflow acme --stages create-project,create-branch --format json
//!   provisionflow acme --format url --show-secrets
//!
//! API credentials come from the environment (a `.env` file is loaded when
//! present). Exit codes: 0 complete, 2 partial, 3 failed, 4 cancelled,
//! 1 usage or configuration error.

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use provisionflow::prelude::*;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const USAGE_ERROR: u8 = 1;

const DEFAULT_FILTER: &str = "provisionflow=info,provisionflow_cli=info";

/// How the report is printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary
    Text,
    /// Full report as JSON
    Json,
    /// Only the application connection string
    Url,
}

/// Provision an isolated tenant environment
#[derive(Parser, Debug)]
#[command(name = "provisionflow", version)]
#[command(about = "Provision a tenant database, credentials and deployments")]
struct Args {
    /// Tenant short name (lowercase letters, digits and hyphens)
    tenant: String,

    /// Domain to point at the tenant frontend
    #[arg(long)]
    domain: Option<String>,

    /// Run only these stages, comma-separated, in pipeline order
    #[arg(long, value_delimiter = ',')]
    stages: Vec<String>,

    /// Cancel the run after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Print passwords instead of masking them
    #[arg(long)]
    show_secrets: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let (plain, json) = if json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .init();
}

fn render(report: &ProvisioningReport, format: OutputFormat, show_secrets: bool) -> anyhow::Result<String> {
    let shown = if show_secrets { report.clone() } else { report.redacted() };
    Ok(match format {
        OutputFormat::Text => shown.to_text(),
        OutputFormat::Json => shown.to_json().context("serializing report")?,
        OutputFormat::Url => match report.connection(kinds::USER) {
            Some(descriptor) if show_secrets => descriptor.to_string(),
            Some(descriptor) => descriptor.to_redacted_string(),
            None => String::new(),
        },
    })
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let mut config = ProvisionConfig::from_env().context("loading configuration")?;
    if let Some(secs) = args.deadline_secs {
        config.orchestrator = config.orchestrator.with_deadline(Duration::from_secs(secs));
    }

    let mut tenant = TenantIdentity::new(args.tenant.as_str())?;
    if let Some(domain) = args.domain {
        tenant = tenant.with_domain(domain);
    }

    let mut pipeline = standard_pipeline(&config, &Poller::new()).context("building pipeline")?;
    if !args.stages.is_empty() {
        pipeline = pipeline.select(&args.stages)?;
    }

    let token = Arc::new(CancellationToken::new());
    let signal_token = Arc::clone(&token);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            signal_token.cancel("interrupted");
        }
    });

    tracing::info!(tenant = %tenant.name, stages = pipeline.len(), "Provisioning tenant");
    let report = Orchestrator::new(config.orchestrator.clone())
        .with_event_sink(Arc::new(LoggingEventSink::debug()))
        .with_cancellation_token(token)
        .run(tenant, &pipeline)
        .await;

    let output = render(&report, args.format, args.show_secrets)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(ExitCode::from(u8::try_from(report.exit_code()).unwrap_or(USAGE_ERROR)))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { USAGE_ERROR } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    // A missing .env is fine; the variables may already be set.
    dotenvy::dotenv().ok();
    init_tracing(args.log_json);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "Provisioning did not start");
            eprintln!("error: {err:#}");
            ExitCode::from(USAGE_ERROR)
        }
    }
}
