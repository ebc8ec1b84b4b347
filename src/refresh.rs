//! Refresh orchestration: when to poll the analysis provider and what the
//! session state looks like after each outcome.
//!
//! Rules implemented:
//! - first load always fetches
//! - three consecutive failures pause auto-refresh until a manual refresh
//! - the next deadline is always `now + REFRESH_INTERVAL` after an attempt
//! - failed fetches never replace the last good document

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisDocument;

pub const REFRESH_INTERVAL_SECS: i64 = 5 * 60;
pub const MAX_CONSECUTIVE_ERRORS: u32 = 3;

pub fn refresh_interval() -> Duration {
    Duration::seconds(REFRESH_INTERVAL_SECS)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("parse failure: {0}")]
    ParseFailure(String),
    #[error("invalid payload shape: {0}")]
    ShapeInvalid(String),
    #[error("data unavailable: {0}")]
    Unavailable(String),
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::ParseFailure(_) => "parse_failure",
            Self::ShapeInvalid(_) => "shape_invalid",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

pub trait DataProvider: Send + 'static {
    fn fetch(&self) -> Result<AnalysisDocument, FetchError>;
}

impl<F> DataProvider for F
where
    F: Fn() -> Result<AnalysisDocument, FetchError> + Send + 'static,
{
    fn fetch(&self) -> Result<AnalysisDocument, FetchError> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    Active,
    PausedByUser,
    PausedByErrors,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefreshState {
    pub last_data: Option<Arc<AnalysisDocument>>,
    pub last_fetch_time: Option<DateTime<Utc>>,
    pub next_refresh_time: DateTime<Utc>,
    pub auto_refresh_enabled: bool,
    pub consecutive_error_count: u32,
    pub last_error: Option<String>,
    paused_by_errors: bool,
}

impl RefreshState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_data: None,
            last_fetch_time: None,
            next_refresh_time: now + refresh_interval(),
            auto_refresh_enabled: true,
            consecutive_error_count: 0,
            last_error: None,
            paused_by_errors: false,
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        if self.auto_refresh_enabled {
            RefreshPhase::Active
        } else if self.paused_by_errors {
            RefreshPhase::PausedByErrors
        } else {
            RefreshPhase::PausedByUser
        }
    }

    pub fn should_fetch_now(&mut self, now: DateTime<Utc>) -> bool {
        if self.last_data.is_none() {
            self.next_refresh_time = now + refresh_interval();
            return true;
        }

        if self.consecutive_error_count >= MAX_CONSECUTIVE_ERRORS {
            if self.auto_refresh_enabled {
                warn!(
                    component = "refresh",
                    event = "refresh.paused.errors",
                    consecutive_error_count = self.consecutive_error_count
                );
            }
            self.auto_refresh_enabled = false;
            self.paused_by_errors = true;
            return false;
        }

        if !self.auto_refresh_enabled {
            return false;
        }

        if now >= self.next_refresh_time {
            self.next_refresh_time = now + refresh_interval();
            return true;
        }

        false
    }

    pub fn tick(&mut self, now: DateTime<Utc>, provider: &dyn DataProvider) -> TickResult {
        if !self.should_fetch_now(now) {
            return TickResult::unchanged(self.last_data.clone());
        }

        self.fetch_and_apply(now, provider)
    }

    pub fn manual_refresh(&mut self, now: DateTime<Utc>, provider: &dyn DataProvider) -> TickResult {
        info!(
            component = "refresh",
            event = "refresh.manual",
            previous_error_count = self.consecutive_error_count,
            auto_refresh_enabled = self.auto_refresh_enabled
        );
        self.consecutive_error_count = 0;
        self.next_refresh_time = now + refresh_interval();
        self.fetch_and_apply(now, provider)
    }

    pub fn set_auto_refresh(&mut self, enabled: bool, now: DateTime<Utc>) {
        if enabled && !self.auto_refresh_enabled {
            self.next_refresh_time = now + refresh_interval();
        }
        if self.auto_refresh_enabled != enabled {
            info!(
                component = "refresh",
                event = "refresh.auto.toggle",
                enabled,
                consecutive_error_count = self.consecutive_error_count
            );
        }
        self.auto_refresh_enabled = enabled;
        self.paused_by_errors = false;
    }

    pub fn time_until_next_refresh(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.next_refresh_time - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    fn fetch_and_apply(&mut self, now: DateTime<Utc>, provider: &dyn DataProvider) -> TickResult {
        let outcome = provider
            .fetch()
            .and_then(|document| document.validate().map(|()| document));

        match outcome {
            Ok(document) => {
                let document = Arc::new(document);
                self.last_data = Some(Arc::clone(&document));
                self.last_fetch_time = Some(now);
                self.consecutive_error_count = 0;
                self.next_refresh_time = now + refresh_interval();
                self.last_error = None;
                info!(
                    component = "refresh",
                    event = "refresh.fetch.ok",
                    fetched_at = %now,
                    next_refresh_at = %self.next_refresh_time
                );
                TickResult {
                    updated: true,
                    data: Some(document),
                    error: None,
                }
            }
            Err(err) => {
                self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
                self.last_error = Some(err.to_string());
                warn!(
                    component = "refresh",
                    event = "refresh.fetch.error",
                    error_kind = err.kind(),
                    error = %err,
                    consecutive_error_count = self.consecutive_error_count,
                    has_stale_data = self.last_data.is_some()
                );
                debug!(
                    component = "refresh",
                    event = "refresh.fetch.error.debug",
                    next_refresh_at = %self.next_refresh_time
                );
                TickResult {
                    updated: false,
                    data: self.last_data.clone(),
                    error: Some(err),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    pub updated: bool,
    pub data: Option<Arc<AnalysisDocument>>,
    pub error: Option<FetchError>,
}

impl TickResult {
    fn unchanged(data: Option<Arc<AnalysisDocument>>) -> Self {
        Self {
            updated: false,
            data,
            error: None,
        }
    }
}

/// Owns the session state together with the provider it polls.
pub struct RefreshOrchestrator {
    state: RefreshState,
    provider: Box<dyn DataProvider>,
}

impl RefreshOrchestrator {
    pub fn new(provider: Box<dyn DataProvider>, now: DateTime<Utc>) -> Self {
        Self {
            state: RefreshState::new(now),
            provider,
        }
    }

    pub fn state(&self) -> &RefreshState {
        &self.state
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> TickResult {
        self.state.tick(now, self.provider.as_ref())
    }

    pub fn manual_refresh(&mut self, now: DateTime<Utc>) -> TickResult {
        self.state.manual_refresh(now, self.provider.as_ref())
    }

    pub fn set_auto_refresh(&mut self, enabled: bool, now: DateTime<Utc>) {
        self.state.set_auto_refresh(enabled, now);
    }

    pub fn time_until_next_refresh(&self, now: DateTime<Utc>) -> Duration {
        self.state.time_until_next_refresh(now)
    }
}

/// `MM:SS` countdown, clamped at zero.
pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
