use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use owo_colors::OwoColorize;
use tokio_postgres::NoTls;

use crate::args::PostgresArgs;

/// Builds the pooled Postgres connection used by the Run store.
///
/// TLS is negotiated whenever `postgres_ssl_mode` requests it; otherwise
/// connections are plaintext, matching the behavior of `sslmode=prefer`.
pub fn init_postgres(args: &PostgresArgs) -> anyhow::Result<Pool> {
    println!(
        "{} {}",
        "🐘 Connecting to Postgres at".cyan(),
        args.url_redacted().cyan()
    );

    let mut cfg = Config::new();
    cfg.host = Some(args.postgres_host.clone());
    cfg.port = Some(args.postgres_port);
    cfg.dbname = Some(args.postgres_database.clone());
    cfg.user = Some(args.postgres_username.clone());
    cfg.password = Some(args.postgres_password.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = if args.postgres_ssl_mode == "disable" {
        cfg.create_pool(Some(Runtime::Tokio1), NoTls)?
    } else {
        let tls = build_tls_connector(args)?;
        cfg.create_pool(Some(Runtime::Tokio1), tls)?
    };

    Ok(pool)
}

fn build_tls_connector(
    _args: &PostgresArgs,
) -> anyhow::Result<tokio_postgres_rustls::MakeRustlsConnect> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    let tls_config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(tokio_postgres_rustls::MakeRustlsConnect::new(tls_config))
}

/// Health-checks a pool by running `SELECT 1`, mirroring the ping
/// health-check this codebase already performs on the Redis pool.
pub async fn ping(pool: &Pool) -> anyhow::Result<()> {
    let client = pool.get().await?;
    client.query_one("SELECT 1", &[]).await?;
    Ok(())
}
