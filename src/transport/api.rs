//! Read-side client for the fall-event backend.
//!
//! `GET <base>list/?start_date=&end_date=` and `GET <base><id>/`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// A stored fall event as the backend serialises it.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct FallEventRecord {
    pub id: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    pub location: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_checked: bool,
}

impl FallEventRecord {
    /// Occurrence time, falling back to the server's creation time.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.occurred_at.unwrap_or(self.created_at)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListBody {
    Plain(Vec<FallEventRecord>),
    Paginated { results: Vec<FallEventRecord> },
}

pub struct BackendClient {
    agent: ureq::Agent,
    base: Url,
}

impl BackendClient {
    /// `base` is the fall-event collection URL, e.g. `http://host:8000/api/fall-events/`.
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base).with_context(|| format!("parse backend url {}", base))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!("backend url must be http(s): {}", base));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base,
        })
    }

    pub fn list_url(&self) -> Result<Url> {
        self.base.join("list/").context("build list url")
    }

    pub fn detail_url(&self, id: i64) -> Result<Url> {
        self.base
            .join(&format!("{}/", id))
            .context("build detail url")
    }

    /// Events with `occurred_at` in `[start, end]`, most recent first.
    pub fn list_events(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<FallEventRecord>> {
        let url = self.list_url()?;
        let mut request = self.agent.get(url.as_str());
        if let Some(start) = start {
            request = request.query("start_date", &start.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        if let Some(end) = end {
            request = request.query("end_date", &end.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        log::debug!("backend: GET {}", url);
        let body = request
            .call()
            .with_context(|| format!("GET {}", url))?
            .into_string()
            .context("read list response")?;
        let mut events = parse_list(&body)?;
        events.sort_by_key(|event| std::cmp::Reverse(event.effective_time()));
        Ok(events)
    }

    pub fn event_detail(&self, id: i64) -> Result<FallEventRecord> {
        let url = self.detail_url(id)?;
        log::debug!("backend: GET {}", url);
        let body = self
            .agent
            .get(url.as_str())
            .call()
            .with_context(|| format!("GET {}", url))?
            .into_string()
            .context("read detail response")?;
        serde_json::from_str(&body).context("parse fall event detail")
    }
}

fn parse_list(body: &str) -> Result<Vec<FallEventRecord>> {
    let parsed: ListBody = serde_json::from_str(body).context("parse fall event list")?;
    Ok(match parsed {
        ListBody::Plain(events) => events,
        ListBody::Paginated { results } => results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"{
        "id": 3,
        "image_url": "http://host/media/fall_images/a.jpg",
        "location": "living_room",
        "description": "Fall detected in living room",
        "occurred_at": "2025-12-01T08:30:00+09:00",
        "created_at": "2025-12-01T08:30:02Z",
        "is_checked": false
    }"#;

    #[test]
    fn builds_endpoint_urls() -> Result<()> {
        let client = BackendClient::new("http://localhost:8000/api/fall-events", Duration::from_secs(1))?;
        assert_eq!(client.list_url()?.as_str(), "http://localhost:8000/api/fall-events/list/");
        assert_eq!(client.detail_url(12)?.as_str(), "http://localhost:8000/api/fall-events/12/");
        assert!(BackendClient::new("ftp://x/", Duration::from_secs(1)).is_err());
        Ok(())
    }

    #[test]
    fn parses_plain_and_paginated_lists() -> Result<()> {
        let plain = parse_list(&format!("[{}]", RECORD))?;
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].occurred_at.map(|t| t.to_rfc3339()), Some("2025-11-30T23:30:00+00:00".to_string()));

        let paged = parse_list(&format!(r#"{{"count": 1, "results": [{}]}}"#, RECORD))?;
        assert_eq!(paged, plain);
        Ok(())
    }

    #[test]
    fn null_occurred_at_falls_back_to_created_at() -> Result<()> {
        let body = RECORD.replace("\"2025-12-01T08:30:00+09:00\"", "null");
        let record: FallEventRecord = serde_json::from_str(&body)?;
        assert_eq!(record.effective_time(), record.created_at);
        Ok(())
    }
}
