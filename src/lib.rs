//! themeboard core crate.
//!
//! Current implemented scope:
//! - refresh orchestration with the 3-strike auto-refresh pause
//! - Airtable table access and the analysis payload provider
//! - dashboard view model, HTML rendering and HTTP routes

mod airtable;
mod analysis;
mod config;
mod dashboard;
mod observability;
mod refresh;
mod service;

pub use airtable::{
    resolve_table_name, select_payload_record, sort_by_number, AirtableAnalysisProvider,
    AirtableClient, AirtableConfig, AirtableError, AirtableRecord, ANALYSIS_TABLE,
    DEFAULT_AIRTABLE_URL, RESULT_FIELD, WRITE_BATCH_SIZE,
};
pub use analysis::{
    cell_text, demo_document, AnalysisDocument, DemoProvider, MarketAnalysis, StockRow, Theme,
    MARKET_ANALYSIS_KEY,
};
pub use config::{
    dashboard_config_from_env, dashboard_config_from_lookup, AirtableSettings, ConfigError,
    DashboardConfig, DEFAULT_DASHBOARD_ADDR, DEFAULT_TICK_INTERVAL_MS,
};
pub use dashboard::{
    build_snapshot, dashboard_router, display_analysis, format_kst, format_rate, format_volume,
    parse_volume_eok, render_dashboard_html, volume_leaders, DashboardSnapshot, DashboardSource,
    DisplayAnalysis, DisplayStockRow, DisplayTheme, RefreshStatusView, VolumeBar,
    NO_DATA_MESSAGE, STOCK_TABLE_HEADERS, VOLUME_LEADER_COUNT,
};
pub use observability::{
    init_logging, log_app_bind, log_app_start, log_provider_selected, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use refresh::{
    format_countdown, refresh_interval, DataProvider, FetchError, RefreshOrchestrator,
    RefreshPhase, RefreshState, TickResult, MAX_CONSECUTIVE_ERRORS, REFRESH_INTERVAL_SECS,
};
pub use service::RefreshService;
