use anyhow::Result;
use clap::Parser;
use parley_server::{api, auth, config, directory, store::SqliteStore};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = config::Cli::parse();
    let cfg = config::Config::load(&cli)?;
    let level = if cfg.logging_enabled { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if cfg.jwt_secret.is_ephemeral() {
        tracing::warn!("no jwt secret configured; issued tokens will not survive a restart");
    }

    if let Some(profile_id) = cli.issue_token {
        println!("{}", token_for(&cfg, profile_id)?);
        return Ok(());
    }
    if let Some(name) = &cli.create_profile {
        std::fs::create_dir_all(&cfg.data_dir)?;
        let store = SqliteStore::open(cfg.database_path())?;
        let conn = store.conn()?;
        let profile = directory::create_profile(&conn, name, None)?;
        println!("{} {}", profile.id, token_for(&cfg, profile.id)?);
        return Ok(());
    }

    api::run_http_server(cfg).await
}

/// Bearer token valid for a day.
fn token_for(cfg: &config::Config, profile_id: Uuid) -> Result<String> {
    auth::issue_jwt(
        cfg.jwt_secret.as_bytes(),
        &profile_id.to_string(),
        time::Duration::hours(24),
    )
}
