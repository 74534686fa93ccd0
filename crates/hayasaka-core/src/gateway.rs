//! Retry-wrapped access to the external prayer-schedule provider.
//!
//! Every fetch is bounded: a fixed per-attempt timeout and a fixed attempt
//! count, after which the caller gets `None`. No error escapes this boundary.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;

use crate::{errors::Error, Result};

const GATEWAY_USER_AGENT: &str = "Mozilla/5.0 (compatible; PrayerBot/1.0)";

/// One selectable schedule location as exposed by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub name: String,
    pub id: String,
}

/// Port for the schedule provider, so the router can be tested without HTTP.
#[async_trait]
pub trait ScheduleGateway: Send + Sync {
    /// All supported locations, or `None` when the provider payload is not
    /// list-shaped or all attempts failed.
    async fn list_locations(&self) -> Option<Vec<Location>>;

    /// Formatted schedule block for one location on today's date, or `None`
    /// for an empty id, a missing schedule object, or total fetch failure.
    async fn schedule_text(&self, city_id: &str) -> Option<String>;
}

pub struct PrayerGateway {
    http: reqwest::Client,
    base_url: String,
    retries: u32,
}

impl PrayerGateway {
    pub fn new(base_url: impl Into<String>, retries: u32, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(GATEWAY_USER_AGENT)
            .build()
            .expect("reqwest client build");
        Self {
            http,
            base_url: base_url.into(),
            retries: retries.max(1),
        }
    }

    /// Fetch `url` with bounded retry and unwrap the provider's `{data: ...}`
    /// envelope. A well-formed response without `data` is not retried.
    async fn fetch_data(&self, url: &str) -> Option<serde_json::Value> {
        let body = with_retry(self.retries, |_| self.try_fetch(url)).await?;
        body.get("data").cloned().filter(|v| !v.is_null())
    }

    async fn try_fetch(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::External(format!("gateway request error: {e}")))?;

        if !resp.status().is_success() {
            return Err(Error::External(format!(
                "gateway http status {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| Error::External(format!("gateway json error: {e}")))
    }
}

#[async_trait]
impl ScheduleGateway for PrayerGateway {
    async fn list_locations(&self) -> Option<Vec<Location>> {
        let data = self.fetch_data(&format!("{}/kota/semua", self.base_url)).await?;
        parse_locations(&data)
    }

    async fn schedule_text(&self, city_id: &str) -> Option<String> {
        if city_id.is_empty() {
            return None;
        }
        let today = Local::now().format("%Y-%m-%d");
        let data = self
            .fetch_data(&format!("{}/jadwal/{city_id}/{today}", self.base_url))
            .await?;
        format_schedule(&data)
    }
}

/// Run `op` up to `retries` times, logging each failed attempt.
///
/// Returns the first success, or `None` once attempts are exhausted.
async fn with_retry<T, F, Fut>(retries: u32, mut op: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    for attempt in 1..=retries.max(1) {
        match op(attempt).await {
            Ok(v) => return Some(v),
            Err(e) => tracing::warn!(attempt, error = %e, "gateway fetch attempt failed"),
        }
    }
    None
}

fn parse_locations(data: &serde_json::Value) -> Option<Vec<Location>> {
    let arr = data.as_array()?;
    Some(
        arr.iter()
            .filter_map(|city| {
                let name = city.get("lokasi")?.as_str()?.to_string();
                let id = match city.get("id")? {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                Some(Location { name, id })
            })
            .collect(),
    )
}

fn format_schedule(data: &serde_json::Value) -> Option<String> {
    let jadwal = data.get("jadwal")?;
    let lokasi = data.get("lokasi").and_then(|v| v.as_str()).unwrap_or("");
    let tanggal = jadwal.get("tanggal").and_then(|v| v.as_str()).unwrap_or("");
    let time = |k: &str| jadwal.get(k).and_then(|v| v.as_str()).unwrap_or("-").to_string();

    Some(format!(
        "📅 *Jadwal Salat {lokasi}* ({tanggal})\n\n\
         - 🕌 *Imsak*: {}\n\
         - 🌄 *Subuh*: {}\n\
         - 🌞 *Dhuha*: {}\n\
         - 🕛 *Dzuhur*: {}\n\
         - 🌅 *Ashar*: {}\n\
         - 🌇 *Maghrib*: {}\n\
         - 🌙 *Isya*: {}",
        time("imsak"),
        time("subuh"),
        time("dhuha"),
        time("dzuhur"),
        time("ashar"),
        time("maghrib"),
        time("isya"),
    ))
}
