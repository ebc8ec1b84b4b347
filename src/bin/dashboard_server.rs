use std::{sync::Arc, time::Duration};

use themeboard::{
    dashboard_config_from_env, dashboard_router, init_logging, log_app_bind, log_app_start,
    log_provider_selected, logging_config_from_env, AirtableAnalysisProvider, DashboardConfig,
    DashboardSource, DataProvider, DemoProvider, RefreshService,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = dashboard_config_from_env()?;
    // The blocking HTTP client is built before entering the async runtime.
    let provider = provider_from_config(&cfg)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(serve(cfg, provider))
}

async fn serve(
    cfg: DashboardConfig,
    provider: Box<dyn DataProvider>,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = RefreshService::new(provider);
    let _ticker = service.spawn_ticker(Duration::from_millis(cfg.tick_interval_ms));

    let source: Arc<dyn DashboardSource> = Arc::new(service);
    let app = dashboard_router(source);
    let listener = tokio::net::TcpListener::bind(cfg.addr).await?;
    let bound_addr = listener.local_addr()?;

    log_app_bind(bound_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn provider_from_config(
    cfg: &DashboardConfig,
) -> Result<Box<dyn DataProvider>, Box<dyn std::error::Error>> {
    if cfg.use_demo {
        log_provider_selected(
            "demo",
            Some("THEMEBOARD_DASHBOARD_USE_DEMO"),
            cfg.tick_interval_ms,
        );
        return Ok(Box::new(DemoProvider));
    }

    match &cfg.airtable {
        Some(airtable) => {
            log_provider_selected("airtable", None, cfg.tick_interval_ms);
            let provider =
                AirtableAnalysisProvider::new(airtable.client.clone(), airtable.table.clone())?;
            Ok(Box::new(provider))
        }
        None => {
            log_provider_selected(
                "demo",
                Some("airtable_credentials_missing"),
                cfg.tick_interval_ms,
            );
            Ok(Box::new(DemoProvider))
        }
    }
}
