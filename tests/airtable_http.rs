use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Method, StatusCode, Uri},
    Json, Router,
};
use reqwest::Url;
use serde_json::{json, Map, Value};
use themeboard::{
    AirtableAnalysisProvider, AirtableClient, AirtableConfig, DataProvider, FetchError,
    WRITE_BATCH_SIZE,
};

const API_KEY: &str = "pat-test";
const BASE_ID: &str = "appTest";

#[derive(Debug, Clone)]
struct RecordedRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    authorization: Option<String>,
    body: String,
}

impl RecordedRequest {
    fn query_values(&self, key: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Minimal stand-in for the Airtable REST API. List calls page through
/// `pages` using `page-N` offsets; writes are echoed back.
#[derive(Clone, Default)]
struct MockAirtable {
    pages: Arc<Vec<Vec<Value>>>,
    fail_status: Option<u16>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockAirtable {
    fn with_pages(pages: Vec<Vec<Value>>) -> Self {
        Self {
            pages: Arc::new(pages),
            ..Self::default()
        }
    }

    fn failing(status: u16) -> Self {
        Self {
            fail_status: Some(status),
            ..Self::default()
        }
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Serves the mock on its own runtime thread and returns the API root.
    fn start(&self) -> String {
        let app = Router::new().fallback(handle).with_state(self.clone());
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                tx.send(listener.local_addr().unwrap()).unwrap();
                axum::serve(listener, app).await.unwrap();
            });
        });

        format!("http://{}/v0", rx.recv().unwrap())
    }

    fn config(&self) -> AirtableConfig {
        AirtableConfig {
            api_url: self.start(),
            timeout_ms: 5_000,
            ..AirtableConfig::new(API_KEY, BASE_ID)
        }
    }
}

async fn handle(
    State(mock): State<MockAirtable>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, Json<Value>) {
    let parsed = Url::parse(&format!("http://mock{uri}")).unwrap();
    let segments: Vec<String> = parsed
        .path_segments()
        .map(|segments| segments.map(str::to_string).collect())
        .unwrap_or_default();
    let query: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let request = RecordedRequest {
        method: method.clone(),
        segments: segments.clone(),
        query,
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: body.clone(),
    };
    mock.requests.lock().unwrap().push(request.clone());

    if let Some(status) = mock.fail_status {
        return (
            StatusCode::from_u16(status).unwrap(),
            Json(json!({ "error": { "type": "SERVER_ERROR" } })),
        );
    }

    match (method, segments.len()) {
        (Method::GET, 3) => {
            let page = request
                .query_values("offset")
                .first()
                .and_then(|raw| raw.strip_prefix("page-"))
                .and_then(|raw| raw.parse::<usize>().ok())
                .unwrap_or(0);
            let records = mock.pages.get(page).cloned().unwrap_or_default();
            let mut out = json!({ "records": records });
            if page + 1 < mock.pages.len() {
                out["offset"] = json!(format!("page-{}", page + 1));
            }
            (StatusCode::OK, Json(out))
        }
        (Method::DELETE, 3) => {
            let deleted: Vec<Value> = request
                .query_values("records[]")
                .into_iter()
                .map(|id| json!({ "id": id, "deleted": true }))
                .collect();
            (StatusCode::OK, Json(json!({ "records": deleted })))
        }
        (Method::POST, 3) => {
            let payload: Value = serde_json::from_str(&body).unwrap();
            let created: Vec<Value> = payload["records"]
                .as_array()
                .unwrap()
                .iter()
                .enumerate()
                .map(|(idx, record)| {
                    json!({
                        "id": format!("recNew{idx}"),
                        "createdTime": "2025-01-02T00:00:00.000Z",
                        "fields": record["fields"],
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!({ "records": created })))
        }
        (Method::PATCH, 4) => {
            let payload: Value = serde_json::from_str(&body).unwrap();
            (
                StatusCode::OK,
                Json(json!({
                    "id": segments[3],
                    "createdTime": "2025-01-01T00:00:00.000Z",
                    "fields": payload["fields"],
                })),
            )
        }
        (Method::DELETE, 4) => (
            StatusCode::OK,
            Json(json!({ "id": segments[3], "deleted": true })),
        ),
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "NOT_FOUND" })),
        ),
    }
}

fn numbered(id: &str, number: i64) -> Value {
    json!({ "id": id, "createdTime": "2025-01-01T00:00:00.000Z", "fields": { "number": number } })
}

fn payload_record(id: &str, created: &str, result: &str) -> Value {
    json!({ "id": id, "createdTime": created, "fields": { "result": result } })
}

fn analysis_payload(theme: &str) -> String {
    json!({
        "market_analysis": {
            "overview": "반도체 강세",
            "leading_themes": [
                { "name": theme, "news": "수출 호조", "stocks": [["삼성전자", "005930", 3.1, 15234]] }
            ]
        }
    })
    .to_string()
}

#[test]
fn list_records_follows_offsets_and_sorts_by_number() {
    let mock = MockAirtable::with_pages(vec![
        vec![numbered("recB", 2), numbered("recC", 3)],
        vec![numbered("recA", 1)],
    ]);
    let client = AirtableClient::new(mock.config()).unwrap();

    let records = client.list_records("top_volume", None).unwrap();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, ["recA", "recB", "recC"]);

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].segments, ["v0", BASE_ID, "top_volume"]);
    assert!(requests[0].query_values("offset").is_empty());
    assert_eq!(requests[1].query_values("offset"), ["page-1"]);
    assert!(requests
        .iter()
        .all(|r| r.authorization.as_deref() == Some("Bearer pat-test")));
}

#[test]
fn list_records_stops_once_limit_is_reached() {
    let mock = MockAirtable::with_pages(vec![
        vec![numbered("rec1", 1), numbered("rec2", 2)],
        vec![numbered("rec3", 3)],
    ]);
    let client = AirtableClient::new(mock.config()).unwrap();

    let records = client.list_records("top_rate", Some(2)).unwrap();

    assert_eq!(records.len(), 2);
    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].query_values("maxRecords"), ["2"]);
}

#[test]
fn korean_table_alias_is_resolved_in_the_request_path() {
    let mock = MockAirtable::with_pages(vec![vec![]]);
    let client = AirtableClient::new(mock.config()).unwrap();

    client.list_records("앤트로픽API응답", None).unwrap();

    assert_eq!(mock.requests()[0].segments[2], "analysis_results");
}

#[test]
fn provider_parses_the_latest_payload_row() {
    let mock = MockAirtable::with_pages(vec![vec![
        payload_record("recOld", "2025-01-01T09:00:00.000Z", &analysis_payload("구버전")),
        payload_record("recNew", "2025-01-02T09:00:00.000Z", &analysis_payload("반도체")),
    ]]);
    let provider = AirtableAnalysisProvider::new(mock.config(), "analysis_results").unwrap();

    let document = provider.fetch().unwrap();

    document.validate().unwrap();
    let analysis = document.market_analysis().unwrap();
    assert_eq!(analysis.leading_themes[0].name, "반도체");
    assert_eq!(analysis.leading_themes[0].stocks[0].name, "삼성전자");
}

#[test]
fn provider_reports_empty_table_as_unavailable() {
    let mock = MockAirtable::with_pages(vec![vec![]]);
    let provider = AirtableAnalysisProvider::new(mock.config(), "analysis_results").unwrap();

    let err = provider.fetch().unwrap_err();

    assert_eq!(
        err,
        FetchError::Unavailable("데이터를 찾을 수 없습니다.".to_string())
    );
}

#[test]
fn provider_reports_missing_result_field_as_unavailable() {
    let mock = MockAirtable::with_pages(vec![vec![json!({ "id": "rec1", "fields": {} })]]);
    let provider = AirtableAnalysisProvider::new(mock.config(), "analysis_results").unwrap();

    let err = provider.fetch().unwrap_err();

    assert!(matches!(err, FetchError::Unavailable(ref message) if message.contains("rec1")));
}

#[test]
fn provider_maps_http_errors_to_transport() {
    let mock = MockAirtable::failing(500);
    let provider = AirtableAnalysisProvider::new(mock.config(), "analysis_results").unwrap();

    let err = provider.fetch().unwrap_err();

    match err {
        FetchError::Transport(message) => {
            assert!(message.starts_with("데이터 가져오기 실패:"));
            assert!(message.contains("HTTP 500"));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[test]
fn provider_maps_malformed_payload_to_parse_failure() {
    let mock = MockAirtable::with_pages(vec![vec![payload_record(
        "rec1",
        "2025-01-01T09:00:00.000Z",
        "{not json",
    )]]);
    let provider = AirtableAnalysisProvider::new(mock.config(), "analysis_results").unwrap();

    let err = provider.fetch().unwrap_err();

    assert!(matches!(err, FetchError::ParseFailure(_)));
}

#[test]
fn unreachable_host_maps_to_transport() {
    let cfg = AirtableConfig {
        api_url: "http://127.0.0.1:9/v0".to_string(),
        timeout_ms: 500,
        ..AirtableConfig::new(API_KEY, BASE_ID)
    };
    let provider = AirtableAnalysisProvider::new(cfg, "analysis_results").unwrap();

    assert!(matches!(provider.fetch(), Err(FetchError::Transport(_))));
}

#[test]
fn replace_records_deletes_then_creates_in_batches() {
    let existing: Vec<Value> = (0..12).map(|i| numbered(&format!("rec{i:02}"), i)).collect();
    let mock = MockAirtable::with_pages(vec![existing]);
    let client = AirtableClient::new(mock.config()).unwrap();
    let rows: Vec<Map<String, Value>> = (0..23)
        .map(|i| {
            let mut fields = Map::new();
            fields.insert("number".to_string(), json!(i));
            fields.insert("종목명".to_string(), json!(format!("종목{i}")));
            fields
        })
        .collect();

    let created = client.replace_records("거래대금상위", &rows).unwrap();

    assert_eq!(created, 23);
    let requests = mock.requests();
    assert!(requests
        .iter()
        .all(|r| r.segments[2] == "top_volume"));

    let deletes: Vec<usize> = requests
        .iter()
        .filter(|r| r.method == Method::DELETE)
        .map(|r| r.query_values("records[]").len())
        .collect();
    assert_eq!(deletes, [WRITE_BATCH_SIZE, 2]);

    let creates: Vec<usize> = requests
        .iter()
        .filter(|r| r.method == Method::POST)
        .map(|r| {
            let body: Value = serde_json::from_str(&r.body).unwrap();
            body["records"].as_array().unwrap().len()
        })
        .collect();
    assert_eq!(creates, [10, 10, 3]);

    let first_post = requests
        .iter()
        .position(|r| r.method == Method::POST)
        .unwrap();
    let last_delete = requests
        .iter()
        .rposition(|r| r.method == Method::DELETE)
        .unwrap();
    assert!(last_delete < first_post);
}

#[test]
fn update_and_delete_target_single_records() {
    let mock = MockAirtable::with_pages(vec![vec![]]);
    let client = AirtableClient::new(mock.config()).unwrap();
    let mut fields = Map::new();
    fields.insert("result".to_string(), json!("{}"));

    let updated = client
        .update_record("analysis_results", "recA", &fields)
        .unwrap();
    client.delete_record("analysis_results", "recB").unwrap();

    assert_eq!(updated.id, "recA");
    assert_eq!(updated.fields["result"], "{}");

    let requests = mock.requests();
    assert_eq!(requests[0].method, Method::PATCH);
    assert_eq!(requests[0].segments, ["v0", BASE_ID, "analysis_results", "recA"]);
    let body: Value = serde_json::from_str(&requests[0].body).unwrap();
    assert_eq!(body["fields"]["result"], "{}");
    assert_eq!(requests[1].method, Method::DELETE);
    assert_eq!(requests[1].segments[3], "recB");
}
