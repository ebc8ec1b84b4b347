//! Market analysis payloads as produced by the upstream analysis job.
//!
//! The refresh loop only cares that a payload parses and carries a
//! `market_analysis` object; the typed view below is what the dashboard
//! renders from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::refresh::{DataProvider, FetchError};

pub const MARKET_ANALYSIS_KEY: &str = "market_analysis";

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisDocument {
    raw: Value,
}

impl AnalysisDocument {
    /// Decodes a serialized payload. Shape is checked separately by
    /// [`AnalysisDocument::validate`].
    pub fn parse(payload: &str) -> Result<Self, FetchError> {
        let raw: Value = serde_json::from_str(payload)
            .map_err(|err| FetchError::ParseFailure(format!("JSON 파싱 오류: {err}")))?;
        Ok(Self::from_value(raw))
    }

    pub fn from_value(raw: Value) -> Self {
        Self { raw }
    }

    pub fn validate(&self) -> Result<(), FetchError> {
        match self.raw.get(MARKET_ANALYSIS_KEY) {
            Some(Value::Object(_)) => Ok(()),
            Some(_) => Err(FetchError::ShapeInvalid(format!(
                "`{MARKET_ANALYSIS_KEY}` is not an object"
            ))),
            None => Err(FetchError::ShapeInvalid(format!(
                "payload has no `{MARKET_ANALYSIS_KEY}` field"
            ))),
        }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Typed view of the `market_analysis` section.
    pub fn market_analysis(&self) -> Result<MarketAnalysis, serde_json::Error> {
        let section = self.raw.get(MARKET_ANALYSIS_KEY).cloned().unwrap_or(Value::Null);
        serde_json::from_value(section)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub leading_themes: Vec<Theme>,
}

impl MarketAnalysis {
    pub fn all_stocks(&self) -> impl Iterator<Item = &StockRow> {
        self.leading_themes
            .iter()
            .flat_map(|theme| theme.stocks.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    #[serde(default)]
    pub news: String,
    #[serde(default)]
    pub stocks: Vec<StockRow>,
}

/// One `(name, code, rate, volume)` row. Cells are kept as raw JSON values
/// because the upstream job mixes strings and numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawStockRow")]
pub struct StockRow {
    pub name: Value,
    pub code: Value,
    pub rate: Value,
    pub volume: Value,
}

impl StockRow {
    pub fn new(
        name: impl Into<Value>,
        code: impl Into<Value>,
        rate: impl Into<Value>,
        volume: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            rate: rate.into(),
            volume: volume.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStockRow {
    Tuple(Value, Value, Value, Value),
    Named {
        name: Value,
        code: Value,
        rate: Value,
        volume: Value,
    },
}

impl From<RawStockRow> for StockRow {
    fn from(raw: RawStockRow) -> Self {
        match raw {
            RawStockRow::Tuple(name, code, rate, volume)
            | RawStockRow::Named {
                name,
                code,
                rate,
                volume,
            } => Self {
                name,
                code,
                rate,
                volume,
            },
        }
    }
}

/// Text of a table cell the way a dataframe `astype(str)` would show it.
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn demo_document() -> AnalysisDocument {
    let raw = serde_json::json!({
        "market_analysis": {
            "overview": "바이오와 조선 업종으로 거래대금이 집중되며 주도 테마가 형성되고 있습니다.",
            "leading_themes": [
                {
                    "name": "바이오",
                    "news": "알테오젠 기술이전 계약 기대감에 바이오 업종 강세",
                    "stocks": [
                        ["알테오젠", "196170", 15.0, 11869],
                        ["삼천당제약", "000250", 8.12, 1520]
                    ]
                },
                {
                    "name": "조선",
                    "news": "대형 수주 소식에 조선주 동반 상승",
                    "stocks": [
                        ["한화오션", "042660", 6.94, 5949],
                        ["HD현대중공업", "329180", 4.31, 2210]
                    ]
                },
                {
                    "name": "2차전지 소재",
                    "news": "리튬 가격 반등에 소재주 매수세 유입",
                    "stocks": [
                        ["DS단석", "017860", 16.0, 2866]
                    ]
                }
            ]
        }
    });

    AnalysisDocument { raw }
}

/// Serves [`demo_document`] on every fetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoProvider;

impl DataProvider for DemoProvider {
    fn fetch(&self) -> Result<AnalysisDocument, FetchError> {
        Ok(demo_document())
    }
}
