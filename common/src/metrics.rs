use owo_colors::OwoColorize;

/// Spawns a Prometheus exporter on `METRICS_PORT` (default 9090) if the
/// `metrics` feature is enabled, matching the optional-metrics pattern this
/// codebase already uses for its reconciliation loop. No-op when the
/// feature is disabled, so call sites never need a `#[cfg]` of their own.
pub fn maybe_spawn_metrics_server(component: impl Into<String>) {
    #[cfg(feature = "metrics")]
    {
        let component = component.into();
        let port: u16 = std::env::var("METRICS_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9090);
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => println!(
                "{} {} {}",
                "📈 Metrics server listening on".green(),
                addr.to_string().green(),
                format!("(component={component})").dimmed()
            ),
            Err(err) => eprintln!("{} {err}", "⚠️  Failed to start metrics server:".yellow()),
        }
    }
    #[cfg(not(feature = "metrics"))]
    {
        let _ = component;
    }
}
