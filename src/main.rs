use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let cfg = crmguard::config::AppConfig::from_env()?;
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "crmguard starting: RUST_LOG='{}', http_port={}, jwt_alg={}, jwt_expiration={}s, jwt_leeway={}s, permissions_file={:?}, users_file={:?}",
        rust_log,
        cfg.http_port,
        cfg.token.algorithm,
        cfg.token.expiration_secs,
        cfg.token.leeway_secs,
        cfg.permissions_file,
        cfg.users_file
    );

    crmguard::server::run_with_config(cfg).await
}
