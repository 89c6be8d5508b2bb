//! Database bootstrap over the Postgres wire protocol.
//!
//! Connects to the tenant database as the owner role, then in a single
//! transaction creates (or re-keys) a restricted application role, creates
//! the `users` table and seeds the admin account.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, Executor, PgConnection};
use std::future::Future;
use std::sync::Arc;

use super::neon::{extra, NeonClient};
use super::{kinds, BootstrapConfig};
use crate::context::ProvisioningContext;
use crate::core::{fields, ResourceHandle, StageOutcome, DEFAULT_PORT};
use crate::credentials::{Credential, CredentialGenerator, Secret};
use crate::errors::ProvisionError;
use crate::polling::{PollSpec, Poller, ProbeResult};
use crate::stages::Stage;

/// Extra handle fields recorded by the bootstrap stage.
pub mod admin {
    /// Seeded admin login.
    pub const EMAIL: &str = "admin_email";
    /// Seeded admin password, in clear; only its hash is stored.
    pub const PASSWORD: &str = "admin_password";
}

const APP_ROLE_KIND: &str = "app";
const ADMIN_KIND: &str = "admin";

const CREATE_USERS_TABLE: &str = r"CREATE EXTENSION IF NOT EXISTS pgcrypto;
CREATE TABLE IF NOT EXISTS users (
    id uuid PRIMARY KEY DEFAULT gen_random_uuid(),
    email text UNIQUE NOT NULL,
    password text NOT NULL,
    role text NOT NULL DEFAULT 'admin',
    created_at timestamptz NOT NULL DEFAULT now()
)";

// The admin password is regenerated on every run, so the stored hash must follow it.
const SEED_ADMIN: &str = "INSERT INTO users (email, password, role) VALUES ($1, $2, 'admin') \
     ON CONFLICT (email) DO UPDATE SET password = EXCLUDED.password, role = EXCLUDED.role";

/// Quotes a Postgres identifier.
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a Postgres string literal.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Builds the role and schema statements run before seeding.
///
/// The role is created when missing and its password replaced when present,
/// so a re-run always leaves exactly one valid password: the new one.
pub(crate) fn bootstrap_statements(app: &Credential, database: &str) -> Vec<String> {
    let role = quote_ident(&app.username);
    let password = quote_literal(app.password.expose());

    vec![
        format!(
            "DO $$\nBEGIN\n  IF EXISTS (SELECT FROM pg_catalog.pg_roles WHERE rolname = {name}) THEN\n    \
             ALTER ROLE {role} WITH LOGIN PASSWORD {password};\n  ELSE\n    \
             CREATE ROLE {role} WITH LOGIN PASSWORD {password};\n  END IF;\nEND\n$$",
            name = quote_literal(&app.username),
        ),
        CREATE_USERS_TABLE.to_string(),
        format!("GRANT CONNECT ON DATABASE {} TO {role}", quote_ident(database)),
        format!("GRANT USAGE ON SCHEMA public TO {role}"),
        format!("GRANT SELECT, INSERT, UPDATE, DELETE ON ALL TABLES IN SCHEMA public TO {role}"),
        format!(
            "ALTER DEFAULT PRIVILEGES IN SCHEMA public GRANT SELECT, INSERT, UPDATE, DELETE ON TABLES TO {role}"
        ),
    ]
}

/// Hashes a password with Argon2id and a random salt, in PHC format.
pub fn hash_password(password: &str) -> Result<String, ProvisionError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| ProvisionError::permanent(format!("failed to hash admin password: {e}")))?;
    Ok(hash.to_string())
}

fn is_transient_sqlstate(code: &str) -> bool {
    // 08: connection exception, 53: insufficient resources
    code.starts_with("08") || code.starts_with("53") || matches!(code, "57P03" | "40001" | "40P01")
}

/// Classifies a Postgres driver error.
#[must_use]
pub fn classify_sqlx(action: &str, err: &sqlx::Error) -> ProvisionError {
    let message = format!("{action}: {err}");
    let transient = match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    };
    if transient {
        ProvisionError::transient(message)
    } else {
        ProvisionError::permanent(message)
    }
}

async fn cancellable<T, F>(ctx: &ProvisioningContext, fut: F) -> Result<T, ProvisionError>
where
    F: Future<Output = Result<T, ProvisionError>>,
{
    let scope = ctx.cancel_scope();
    scope.checkpoint()?;
    tokio::select! {
        result = fut => result,
        () = scope.cancelled() => Err(ProvisionError::cancelled(
            scope.reason().unwrap_or_else(|| "cancelled".to_string()),
        )),
    }
}

async fn run_bootstrap(
    conn: &mut PgConnection,
    statements: &str,
    admin_email: &str,
    admin_hash: &str,
) -> Result<(), ProvisionError> {
    let mut tx = conn.begin().await.map_err(|e| classify_sqlx("begin", &e))?;
    (&mut *tx)
        .execute(sqlx::raw_sql(statements))
        .await
        .map_err(|e| classify_sqlx("bootstrap schema", &e))?;
    (&mut *tx)
        .execute(sqlx::query(SEED_ADMIN).bind(admin_email).bind(admin_hash))
        .await
        .map_err(|e| classify_sqlx("seed admin", &e))?;
    tx.commit().await.map_err(|e| classify_sqlx("commit", &e))
}

/// Creates the application role, schema and admin account.
#[derive(Debug, Clone)]
pub struct BootstrapDatabaseStage {
    neon: Arc<NeonClient>,
    config: BootstrapConfig,
    poller: Poller,
    generator: CredentialGenerator,
}

impl BootstrapDatabaseStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(neon: Arc<NeonClient>, config: BootstrapConfig, poller: Poller) -> Self {
        Self {
            neon,
            config,
            poller,
            generator: CredentialGenerator::new(),
        }
    }

    fn admin_email(&self, ctx: &ProvisioningContext) -> String {
        let tenant = ctx.tenant();
        match (&self.config.admin_email, &tenant.domain) {
            (Some(email), _) => email.clone(),
            (None, Some(domain)) => format!("admin@{domain}"),
            (None, None) => format!("admin@{}.com", tenant.name),
        }
    }

    async fn connect(
        &self,
        ctx: &ProvisioningContext,
        options: &PgConnectOptions,
        host: &str,
    ) -> Result<PgConnection, ProvisionError> {
        let spec = PollSpec::new(format!("postgres {host}"), self.config.connect_poll.clone());
        self.poller
            .await_ready(&spec, ctx, move || async move {
                match cancellable(ctx, async {
                    PgConnection::connect_with(options)
                        .await
                        .map_err(|e| classify_sqlx("connect", &e))
                })
                .await
                {
                    Ok(conn) => ProbeResult::Ready(conn),
                    Err(err) => ProbeResult::Error(err),
                }
            })
            .await
    }

    async fn create(&self, ctx: &ProvisioningContext) -> Result<ResourceHandle, ProvisionError> {
        let host = ctx.require(kinds::DATABASE, fields::HOST)?;
        let database = ctx.require(kinds::DATABASE, fields::DATABASE)?;
        let owner = ctx.require(kinds::DATABASE, extra::OWNER_ROLE)?;
        let project_id = ctx.require(kinds::DATABASE, extra::PROJECT_ID)?;
        let branch_id = ctx.require(kinds::DATABASE, extra::BRANCH_ID)?;

        let owner_password: Secret = self.neon.reveal_password(ctx, project_id, branch_id, owner).await?;
        let app = self.generator.credential_for(ctx.tenant(), APP_ROLE_KIND);
        let admin_email = self.admin_email(ctx);
        let admin_password = self.generator.credential_for(ctx.tenant(), ADMIN_KIND).password;
        let admin_hash = hash_password(admin_password.expose())?;

        let options = PgConnectOptions::new()
            .host(host)
            .port(DEFAULT_PORT)
            .username(owner)
            .password(owner_password.expose())
            .database(database)
            .ssl_mode(PgSslMode::Require);

        let mut conn = self.connect(ctx, &options, host).await?;
        tracing::debug!(tenant = %ctx.tenant().name, role = %app.username, "Bootstrapping database");

        let statements = bootstrap_statements(&app, database).join(";\n");
        cancellable(ctx, run_bootstrap(&mut conn, &statements, &admin_email, &admin_hash)).await?;

        if let Err(err) = conn.close().await {
            tracing::debug!(error = %err, "Closing bootstrap connection failed");
        }

        Ok(ResourceHandle::new()
            .with(fields::HOST, host)
            .with(fields::PORT, DEFAULT_PORT.to_string())
            .with(fields::DATABASE, database)
            .with(fields::USERNAME, app.username)
            .with(fields::PASSWORD, app.password.expose())
            .with(admin::EMAIL, admin_email)
            .with(admin::PASSWORD, admin_password.expose())
            .with(extra::PROJECT_ID, project_id)
            .with(extra::BRANCH_ID, branch_id))
    }
}

#[async_trait]
impl Stage for BootstrapDatabaseStage {
    fn name(&self) -> &str {
        "bootstrap-database"
    }

    fn resource_kind(&self) -> &str {
        kinds::USER
    }

    async fn execute(&self, ctx: &ProvisioningContext) -> StageOutcome {
        self.create(ctx).await.into()
    }
}
