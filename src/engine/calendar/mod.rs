// Qualibot Engine — Calendar Client (C2)
// Availability, event create/update/cancel against the external calendar.
// Retries transient failures; surfaces permanent ones immediately.

pub mod slots;

use crate::atoms::constants::{CALENDAR_BASE_DELAY_MS, CALENDAR_MAX_DELAY_MS, CALENDAR_MAX_RETRIES};
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::types::BusyInterval;
use crate::engine::http::{is_retryable_status, retry_delay, CircuitBreaker};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct CreatedEvent {
    pub external_id: String,
    pub join_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EventPatch {
    pub subject: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// A remote event as last observed by the provider, returned by `sync`.
/// `cancelled` covers both deletions and provider-side cancellations — C6
/// treats either as grounds to mark the local meeting cancelled.
#[derive(Debug, Clone)]
pub struct SyncedEvent {
    pub external_id: String,
    pub subject: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub cancelled: bool,
}

/// The calendar-integration tool. Implemented against a concrete provider's
/// REST API; mocked in tests by a stub that returns scripted responses.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    async fn get_schedule(&self, user_email: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> EngineResult<Vec<BusyInterval>>;

    async fn create_event(
        &self,
        subject: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        attendees: &[String],
        online: bool,
    ) -> EngineResult<CreatedEvent>;

    async fn update_event(&self, external_id: &str, patch: EventPatch) -> EngineResult<()>;

    async fn cancel_event(&self, external_id: &str) -> EngineResult<()>;

    /// Events created, moved, or cancelled on the provider's side since
    /// `since` — reconciles operator-side edits made directly in the
    /// calendar app rather than through this service.
    async fn sync(&self, since: DateTime<Utc>) -> EngineResult<Vec<SyncedEvent>>;
}

/// Type-erased calendar client so the orchestrator can hold one without
/// knowing the concrete backend.
pub struct AnyCalendarClient(Box<dyn CalendarClient>);

impl AnyCalendarClient {
    pub fn new(inner: Box<dyn CalendarClient>) -> Self {
        Self(inner)
    }
}

#[async_trait]
impl CalendarClient for AnyCalendarClient {
    async fn get_schedule(&self, user_email: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> EngineResult<Vec<BusyInterval>> {
        self.0.get_schedule(user_email, window_start, window_end).await
    }

    async fn create_event(&self, subject: &str, start: DateTime<Utc>, end: DateTime<Utc>, attendees: &[String], online: bool) -> EngineResult<CreatedEvent> {
        self.0.create_event(subject, start, end, attendees, online).await
    }

    async fn update_event(&self, external_id: &str, patch: EventPatch) -> EngineResult<()> {
        self.0.update_event(external_id, patch).await
    }

    async fn cancel_event(&self, external_id: &str) -> EngineResult<()> {
        self.0.cancel_event(external_id).await
    }

    async fn sync(&self, since: DateTime<Utc>) -> EngineResult<Vec<SyncedEvent>> {
        self.0.sync(since).await
    }
}

/// Concrete HTTP client for an OAuth2 calendar provider (Microsoft Graph /
/// Google Calendar-shaped REST API — the exact wire format lives in the
/// deployment's configuration, not in this type).
pub struct HttpCalendarClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    breaker: CircuitBreaker,
}

#[derive(Debug, Deserialize)]
struct BusyIntervalWire {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl HttpCalendarClient {
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            access_token: access_token.into(),
            breaker: CircuitBreaker::new(5, 60),
        }
    }

    async fn send_with_retry(&self, build: impl Fn() -> reqwest::RequestBuilder) -> EngineResult<reqwest::Response> {
        self.breaker.check().map_err(|e| EngineError::transient("calendar", e))?;

        let mut attempt = 0;
        loop {
            let response = build()
                .bearer_auth(&self.access_token)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    self.breaker.record_success();
                    return Ok(resp);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let retry_after = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(crate::engine::http::parse_retry_after);

                    if is_retryable_status(status) && attempt < CALENDAR_MAX_RETRIES {
                        self.breaker.record_failure();
                        warn!("[calendar] transient status {status}, attempt {attempt}");
                        retry_delay(attempt, CALENDAR_BASE_DELAY_MS, CALENDAR_MAX_DELAY_MS, retry_after).await;
                        attempt += 1;
                        continue;
                    }

                    if is_retryable_status(status) {
                        self.breaker.record_failure();
                        return Err(EngineError::transient("calendar", format!("exhausted retries at status {status}")));
                    }

                    return Err(EngineError::permanent("calendar", format!("status {status}")));
                }
                Err(err) if attempt < CALENDAR_MAX_RETRIES => {
                    self.breaker.record_failure();
                    warn!("[calendar] network error, attempt {attempt}: {err}");
                    retry_delay(attempt, CALENDAR_BASE_DELAY_MS, CALENDAR_MAX_DELAY_MS, None).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.breaker.record_failure();
                    return Err(EngineError::from_reqwest("calendar", err));
                }
            }
        }
    }
}

#[async_trait]
impl CalendarClient for HttpCalendarClient {
    async fn get_schedule(&self, user_email: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> EngineResult<Vec<BusyInterval>> {
        let url = format!("{}/users/{}/calendar/getSchedule", self.base_url, user_email);
        let resp = self
            .send_with_retry(|| {
                self.client.post(&url).json(&serde_json::json!({
                    "startTime": window_start,
                    "endTime": window_end,
                }))
            })
            .await?;

        let wire: Vec<BusyIntervalWire> = resp.json().await.map_err(|e| EngineError::from_reqwest("calendar", e))?;
        Ok(wire.into_iter().map(|w| BusyInterval { start: w.start, end: w.end }).collect())
    }

    async fn create_event(&self, subject: &str, start: DateTime<Utc>, end: DateTime<Utc>, attendees: &[String], online: bool) -> EngineResult<CreatedEvent> {
        let url = format!("{}/me/events", self.base_url);
        let resp = self
            .send_with_retry(|| {
                self.client.post(&url).json(&serde_json::json!({
                    "subject": subject,
                    "start": start,
                    "end": end,
                    "attendees": attendees,
                    "isOnlineMeeting": online,
                }))
            })
            .await?;

        #[derive(Deserialize)]
        struct CreatedWire {
            id: String,
            #[serde(default)]
            online_meeting_url: Option<String>,
        }
        let wire: CreatedWire = resp.json().await.map_err(|e| EngineError::from_reqwest("calendar", e))?;
        Ok(CreatedEvent { external_id: wire.id, join_url: wire.online_meeting_url })
    }

    async fn update_event(&self, external_id: &str, patch: EventPatch) -> EngineResult<()> {
        let url = format!("{}/me/events/{}", self.base_url, external_id);
        self.send_with_retry(|| {
            self.client.patch(&url).json(&serde_json::json!({
                "subject": patch.subject,
                "start": patch.start,
                "end": patch.end,
            }))
        })
        .await?;
        Ok(())
    }

    async fn cancel_event(&self, external_id: &str) -> EngineResult<()> {
        let url = format!("{}/me/events/{}/cancel", self.base_url, external_id);
        self.send_with_retry(|| self.client.post(&url)).await?;
        Ok(())
    }

    async fn sync(&self, since: DateTime<Utc>) -> EngineResult<Vec<SyncedEvent>> {
        let url = format!("{}/me/events", self.base_url);
        let filter = format!("lastModifiedDateTime ge {}", since.to_rfc3339());
        let resp = self
            .send_with_retry(|| self.client.get(&url).query(&[("$filter", filter.as_str())]))
            .await?;

        #[derive(Deserialize)]
        struct EventWire {
            id: String,
            subject: String,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            #[serde(default, rename = "isCancelled")]
            is_cancelled: bool,
        }
        #[derive(Deserialize)]
        struct ListWire {
            value: Vec<EventWire>,
        }

        let wire: ListWire = resp.json().await.map_err(|e| EngineError::from_reqwest("calendar", e))?;
        Ok(wire
            .value
            .into_iter()
            .map(|e| SyncedEvent { external_id: e.id, subject: e.subject, start: e.start, end: e.end, cancelled: e.is_cancelled })
            .collect())
    }
}
