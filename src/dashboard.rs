//! Dashboard view model and HTTP routes.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use chrono_tz::Asia::Seoul;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::{cell_text, MarketAnalysis, StockRow, Theme};
use crate::refresh::{format_countdown, RefreshPhase, RefreshState};

pub const STOCK_TABLE_HEADERS: [&str; 4] = ["종목명", "종목코드", "등락율", "거래대금"];
pub const VOLUME_LEADER_COUNT: usize = 10;
pub const NO_DATA_MESSAGE: &str = "데이터를 불러올 수 없습니다.";

const RATE_SUFFIX: &str = "%";
const VOLUME_SUFFIX: &str = "억";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at_kst: String,
    pub status: RefreshStatusView,
    pub analysis: Option<DisplayAnalysis>,
    pub volume_leaders: Vec<VolumeBar>,
    pub render_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshStatusView {
    pub phase: RefreshPhase,
    pub auto_refresh_enabled: bool,
    pub consecutive_error_count: u32,
    pub last_fetch_ts: Option<i64>,
    pub last_fetch_kst: Option<String>,
    pub next_refresh_in: String,
    pub next_refresh_in_secs: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayAnalysis {
    pub overview: String,
    pub left_themes: Vec<DisplayTheme>,
    pub right_themes: Vec<DisplayTheme>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayTheme {
    pub name: String,
    pub news: String,
    pub rows: Vec<DisplayStockRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayStockRow {
    pub name: String,
    pub code: String,
    pub rate: String,
    pub volume: String,
}

impl DisplayStockRow {
    pub fn to_cell_text_values(&self) -> [&str; 4] {
        [
            self.name.as_str(),
            self.code.as_str(),
            self.rate.as_str(),
            self.volume.as_str(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeBar {
    pub name: String,
    pub volume_eok: f64,
}

/// Read/write surface the HTTP layer needs from the refresh loop.
pub trait DashboardSource: Send + Sync + 'static {
    fn snapshot(&self) -> DashboardSnapshot;
    fn manual_refresh(&self) -> DashboardSnapshot;
    fn set_auto_refresh(&self, enabled: bool) -> DashboardSnapshot;
}

pub fn dashboard_router(source: Arc<dyn DashboardSource>) -> Router {
    Router::new()
        .route("/dashboard", get(get_dashboard_html))
        .route("/dashboard/snapshot", get(get_dashboard_snapshot))
        .route("/dashboard/refresh", post(post_manual_refresh))
        .route("/dashboard/auto-refresh", post(post_auto_refresh))
        .with_state(DashboardAppState { source })
}

pub fn format_rate(value: &serde_json::Value) -> String {
    format!("{}{RATE_SUFFIX}", cell_text(value))
}

pub fn format_volume(value: &serde_json::Value) -> String {
    format!("{}{VOLUME_SUFFIX}", cell_text(value))
}

/// Numeric volume in 억원, rounded to a whole number. `None` when the cell
/// is not a number once the unit suffix is stripped.
pub fn parse_volume_eok(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => {
            text.replace(VOLUME_SUFFIX, "").trim().parse::<f64>().ok()
        }
        _ => None,
    }?;
    parsed.is_finite().then(|| parsed.round())
}

pub fn display_row(row: &StockRow) -> DisplayStockRow {
    DisplayStockRow {
        name: cell_text(&row.name),
        code: cell_text(&row.code),
        rate: format_rate(&row.rate),
        volume: format_volume(&row.volume),
    }
}

fn display_theme(theme: &Theme) -> DisplayTheme {
    DisplayTheme {
        name: theme.name.clone(),
        news: theme.news.clone(),
        rows: theme.stocks.iter().map(display_row).collect(),
    }
}

/// Themes alternate between the two columns: even positions left, odd right.
pub fn display_analysis(analysis: &MarketAnalysis) -> DisplayAnalysis {
    let (left, right): (Vec<_>, Vec<_>) = analysis
        .leading_themes
        .iter()
        .enumerate()
        .partition(|(idx, _)| idx % 2 == 0);

    DisplayAnalysis {
        overview: analysis.overview.clone(),
        left_themes: left.into_iter().map(|(_, theme)| display_theme(theme)).collect(),
        right_themes: right.into_iter().map(|(_, theme)| display_theme(theme)).collect(),
    }
}

/// Largest `count` stocks by volume across every theme, in ascending order
/// so a horizontal bar chart reads bottom-up.
pub fn volume_leaders(analysis: &MarketAnalysis, count: usize) -> Vec<VolumeBar> {
    let mut bars: Vec<VolumeBar> = analysis
        .all_stocks()
        .filter_map(|row| {
            parse_volume_eok(&row.volume).map(|volume_eok| VolumeBar {
                name: cell_text(&row.name),
                volume_eok,
            })
        })
        .collect();

    bars.sort_by(|a, b| a.volume_eok.total_cmp(&b.volume_eok));
    let skip = bars.len().saturating_sub(count);
    bars.split_off(skip)
}

pub fn format_kst(ts: DateTime<Utc>, pattern: &str) -> String {
    ts.with_timezone(&Seoul).format(pattern).to_string()
}

pub fn build_snapshot(state: &RefreshState, now: DateTime<Utc>) -> DashboardSnapshot {
    let remaining = state.time_until_next_refresh(now);
    let status = RefreshStatusView {
        phase: state.phase(),
        auto_refresh_enabled: state.auto_refresh_enabled,
        consecutive_error_count: state.consecutive_error_count,
        last_fetch_ts: state.last_fetch_time.map(|ts| ts.timestamp()),
        last_fetch_kst: state
            .last_fetch_time
            .map(|ts| format_kst(ts, "%Y-%m-%d %H:%M:%S")),
        next_refresh_in: format_countdown(remaining),
        next_refresh_in_secs: remaining.num_seconds(),
        last_error: state.last_error.clone(),
    };

    let mut snapshot = DashboardSnapshot {
        generated_at_kst: format_kst(now, "%H:%M:%S"),
        status,
        analysis: None,
        volume_leaders: Vec::new(),
        render_error: None,
    };

    match state.last_data.as_deref().map(|doc| doc.market_analysis()) {
        Some(Ok(analysis)) => {
            snapshot.volume_leaders = volume_leaders(&analysis, VOLUME_LEADER_COUNT);
            snapshot.analysis = Some(display_analysis(&analysis));
        }
        Some(Err(err)) => {
            warn!(
                component = "dashboard",
                event = "dashboard.render.decode_failed",
                error = %err
            );
            snapshot.render_error = Some(format!("{NO_DATA_MESSAGE} ({err})"));
        }
        None => snapshot.render_error = Some(NO_DATA_MESSAGE.to_string()),
    }

    snapshot
}

pub fn render_dashboard_html(snapshot: &DashboardSnapshot) -> String {
    let status = &snapshot.status;
    let mut out = String::new();
    out.push_str("<!DOCTYPE html><html lang=\"ko\"><head><meta charset=\"utf-8\">\n");
    out.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    out.push_str("<title>시장 분석 대시보드</title>\n");
    out.push_str("<style>*{box-sizing:border-box}body{margin:0;font-family:\"Pretendard\",\"Apple SD Gothic Neo\",\"Segoe UI\",sans-serif;background:#f6f7f9;color:#1d232a}.shell{max-width:860px;margin:0 auto;padding:48px 16px 0}.controls{display:flex;gap:10px;align-items:center;flex-wrap:wrap;margin-bottom:12px}.controls button{flex:1;padding:9px 12px;border-radius:8px;border:1px solid #c9ced6;background:#fff;font-size:.95rem;cursor:pointer}.meta{font-size:.85rem;color:#5d6873}.info{background:#e8f1fb;border-radius:8px;padding:12px 14px;color:#124272}.error{background:#fdecea;border-radius:8px;padding:12px 14px;color:#8a1c12}.columns{display:grid;grid-template-columns:1fr 1fr;gap:18px}.theme h5{margin:18px 0 6px;font-size:1.05rem}table{width:100%;border-collapse:collapse;background:#fff}th,td{border-bottom:1px solid #e3e6ea;padding:5px 8px;font-size:.85rem;text-align:left;white-space:nowrap}.chart{margin:24px 0;background:#fff;border-radius:8px;padding:12px 14px}.bar-row{display:flex;align-items:center;gap:8px;margin:4px 0;font-size:.82rem}.bar-label{width:110px;overflow:hidden;text-overflow:ellipsis}.bar{height:16px;background:#636efa;border-radius:3px}@media (max-width:640px){.columns{grid-template-columns:1fr}}</style>\n");
    out.push_str("</head><body><main class=\"shell\">\n");
    out.push_str(&format!(
        "<h1>📊 실시간 주도주 탐색기 ({})</h1>\n",
        escape_html(&snapshot.generated_at_kst)
    ));

    out.push_str("<section class=\"controls\">");
    out.push_str("<button id=\"refresh-btn\" type=\"button\">🔄 새로고침</button>");
    out.push_str(&format!(
        "<button id=\"auto-refresh-btn\" type=\"button\" data-enabled=\"{}\">{}</button>",
        status.auto_refresh_enabled,
        if status.auto_refresh_enabled {
            "⏸ 자동 새로고침 끄기"
        } else {
            "▶ 자동 새로고침 켜기"
        }
    ));
    out.push_str("</section>\n<p class=\"meta\">");
    out.push_str(&format!(
        "상태: {} · 다음 새로고침까지 <span id=\"countdown\">{}</span>",
        phase_label(status.phase),
        escape_html(&status.next_refresh_in)
    ));
    if let Some(last_fetch) = &status.last_fetch_kst {
        out.push_str(&format!(" · 마지막 갱신: {}", escape_html(last_fetch)));
    }
    out.push_str("</p>\n");

    if let Some(message) = &status.last_error {
        out.push_str(&format!(
            "<div class=\"error\">데이터 가져오기 실패 ({}회 연속): {}</div>\n",
            status.consecutive_error_count,
            escape_html(message)
        ));
    }

    match (&snapshot.analysis, &snapshot.render_error) {
        (Some(analysis), _) => render_analysis(&mut out, analysis, &snapshot.volume_leaders),
        (None, Some(message)) => {
            out.push_str(&format!("<div class=\"error\">{}</div>\n", escape_html(message)));
        }
        (None, None) => {
            out.push_str(&format!("<div class=\"error\">{NO_DATA_MESSAGE}</div>\n"));
        }
    }

    out.push_str("</main>\n<script>\n");
    out.push_str(&format!(
        "const renderedFetchTs = {};\n",
        status
            .last_fetch_ts
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "null".to_string())
    ));
    out.push_str("async function poll(){try{const res=await fetch('/dashboard/snapshot');const snap=await res.json();document.getElementById('countdown').textContent=snap.status.next_refresh_in;if(snap.status.last_fetch_ts!==renderedFetchTs){location.reload();}}catch(e){}}\n");
    out.push_str("document.getElementById('refresh-btn').addEventListener('click',async()=>{await fetch('/dashboard/refresh',{method:'POST'});location.reload();});\n");
    out.push_str("document.getElementById('auto-refresh-btn').addEventListener('click',async(ev)=>{const next=ev.target.dataset.enabled!=='true';await fetch('/dashboard/auto-refresh?enabled='+next,{method:'POST'});location.reload();});\n");
    out.push_str("setInterval(poll, 1000);\n");
    out.push_str("</script></body></html>\n");
    out
}

fn render_analysis(out: &mut String, analysis: &DisplayAnalysis, leaders: &[VolumeBar]) {
    out.push_str(&format!(
        "<div class=\"info\">{}</div>\n",
        escape_html(&analysis.overview)
    ));

    out.push_str("<section class=\"columns\">\n");
    for column in [&analysis.left_themes, &analysis.right_themes] {
        out.push_str("<div class=\"column\">");
        for theme in column {
            render_theme(out, theme);
        }
        out.push_str("</div>\n");
    }
    out.push_str("</section>\n");

    let max = leaders
        .iter()
        .map(|bar| bar.volume_eok)
        .fold(0.0_f64, f64::max);
    out.push_str("<section class=\"chart\"><h4>종목별 거래대금 (억원)</h4>\n");
    // Largest bar on top, matching a bottom-up horizontal chart.
    for bar in leaders.iter().rev() {
        let width = if max > 0.0 {
            bar.volume_eok / max * 100.0
        } else {
            0.0
        };
        out.push_str(&format!(
            "<div class=\"bar-row\"><span class=\"bar-label\">{}</span><span class=\"bar\" style=\"width:{:.1}%\"></span><span>{}</span></div>\n",
            escape_html(&bar.name),
            width,
            bar.volume_eok
        ));
    }
    out.push_str("</section>\n");
}

fn render_theme(out: &mut String, theme: &DisplayTheme) {
    out.push_str("<div class=\"theme\">");
    out.push_str(&format!("<h5>{}</h5>", escape_html(&theme.name)));
    out.push_str(&format!("<p>{}</p>", escape_html(&theme.news)));
    out.push_str("<table><thead><tr>");
    for header in STOCK_TABLE_HEADERS {
        out.push_str(&format!("<th>{header}</th>"));
    }
    out.push_str("</tr></thead><tbody>");
    for row in &theme.rows {
        out.push_str("<tr>");
        for value in row.to_cell_text_values() {
            out.push_str(&format!("<td>{}</td>", escape_html(value)));
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table></div>");
}

fn phase_label(phase: RefreshPhase) -> &'static str {
    match phase {
        RefreshPhase::Active => "자동 새로고침 중",
        RefreshPhase::PausedByUser => "자동 새로고침 일시정지",
        RefreshPhase::PausedByErrors => "연속 오류로 자동 새로고침 중지",
    }
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[derive(Clone)]
struct DashboardAppState {
    source: Arc<dyn DashboardSource>,
}

#[derive(Debug, Deserialize)]
struct AutoRefreshQuery {
    enabled: bool,
}

async fn get_dashboard_html(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.source.snapshot();
    Html(render_dashboard_html(&snapshot))
}

async fn get_dashboard_snapshot(State(state): State<DashboardAppState>) -> impl IntoResponse {
    let snapshot = state.source.snapshot();
    info!(
        component = "dashboard",
        event = "http.snapshot.request",
        has_data = snapshot.analysis.is_some(),
        phase = ?snapshot.status.phase
    );
    Json(snapshot)
}

async fn post_manual_refresh(
    State(state): State<DashboardAppState>,
) -> Result<Json<DashboardSnapshot>, StatusCode> {
    info!(component = "dashboard", event = "http.refresh.request");
    let source = Arc::clone(&state.source);
    run_blocking(move || source.manual_refresh()).await
}

async fn post_auto_refresh(
    State(state): State<DashboardAppState>,
    Query(query): Query<AutoRefreshQuery>,
) -> Result<Json<DashboardSnapshot>, StatusCode> {
    info!(
        component = "dashboard",
        event = "http.auto_refresh.request",
        enabled = query.enabled
    );
    let source = Arc::clone(&state.source);
    run_blocking(move || source.set_auto_refresh(query.enabled)).await
}

// Mutations can wait on an in-flight provider fetch, so keep them off the
// async workers.
async fn run_blocking(
    f: impl FnOnce() -> DashboardSnapshot + Send + 'static,
) -> Result<Json<DashboardSnapshot>, StatusCode> {
    tokio::task::spawn_blocking(f)
        .await
        .map(Json)
        .map_err(|err| {
            warn!(
                component = "dashboard",
                event = "http.blocking_task.failed",
                error = %err
            );
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
