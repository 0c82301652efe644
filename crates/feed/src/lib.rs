//! Vigie feed: fetching and shaping the remote order feed.
//!
//! The backend is a plain REST endpoint returning order records as JSON.
//! Everything here is tolerant: field spellings vary across backend
//! versions, and a record we cannot shape is skipped with a warning rather
//! than failing the whole pass.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use vigie_core::OrderRecord;

/// Source of order-feed snapshots. One call per reconciliation pass.
#[async_trait::async_trait]
pub trait OrderFeed: Send + Sync {
    async fn fetch_orders(&self) -> Result<Vec<OrderRecord>>;
}

/// HTTP implementation over the dashboard backend.
pub struct HttpFeed {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), url: url.into(), token }
    }

    /// Build from `VIGIE_FEED_URL` / `VIGIE_FEED_TOKEN`.
    pub fn from_env() -> Result<Self> {
        let url = std::env::var("VIGIE_FEED_URL").context("VIGIE_FEED_URL not set")?;
        let token = std::env::var("VIGIE_FEED_TOKEN").ok();
        Ok(Self::new(url, token))
    }
}

#[async_trait::async_trait]
impl OrderFeed for HttpFeed {
    async fn fetch_orders(&self) -> Result<Vec<OrderRecord>> {
        let mut req = self.client.get(&self.url);
        if let Some(tok) = &self.token {
            req = req.bearer_auth(tok);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("fetching order feed from {}", self.url))?
            .error_for_status()
            .context("order feed returned an error status")?;
        let body: serde_json::Value = resp.json().await.context("decoding order feed body")?;
        let records = shape_feed(&body);
        debug!(count = records.len(), "order feed fetched");
        Ok(records)
    }
}

/// Static in-memory feed for tests and demos.
pub struct StaticFeed {
    orders: std::sync::Mutex<Vec<OrderRecord>>,
}

impl StaticFeed {
    pub fn new(orders: Vec<OrderRecord>) -> Self {
        Self { orders: std::sync::Mutex::new(orders) }
    }

    /// Replace the snapshot returned by subsequent fetches.
    pub fn set(&self, orders: Vec<OrderRecord>) {
        *self.orders.lock().unwrap() = orders;
    }
}

#[async_trait::async_trait]
impl OrderFeed for StaticFeed {
    async fn fetch_orders(&self) -> Result<Vec<OrderRecord>> {
        Ok(self.orders.lock().unwrap().clone())
    }
}

/// Unwrap the payload (bare array, `{orders: [...]}` or `{data: [...]}`)
/// and shape every record, skipping the ones we cannot.
pub fn shape_feed(body: &serde_json::Value) -> Vec<OrderRecord> {
    let items = match body {
        serde_json::Value::Array(a) => a.as_slice(),
        serde_json::Value::Object(o) => o
            .get("orders")
            .or_else(|| o.get("data"))
            .and_then(|v| v.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]),
        _ => &[],
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match order_from_json(item) {
            Ok(rec) => out.push(rec),
            Err(e) => warn!(error = %e, "skipping unshapeable order record"),
        }
    }
    out
}

fn str_field<'a>(v: &'a serde_json::Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| v.get(*k).and_then(|x| x.as_str()))
}

fn string_or_number(v: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match v.get(*k) {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn ts_field(v: &serde_json::Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    str_field(v, keys)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Shape one backend record into an [`OrderRecord`].
pub fn order_from_json(v: &serde_json::Value) -> Result<OrderRecord> {
    let id = string_or_number(v, &["id", "_id", "orderId"])
        .ok_or_else(|| anyhow!("order record missing id"))?;
    let status_raw = str_field(v, &["status", "orderStatus", "state"])
        .unwrap_or_default()
        .to_string();
    let status_label = str_field(v, &["statusText", "statusLabel", "status_label"]).map(String::from);
    let customer_name = str_field(v, &["customerName", "customer", "clientName", "client"]).map(String::from);
    let order_number = string_or_number(v, &["orderNumber", "reference", "number"]);
    let location = str_field(v, &["location", "address", "deliveryAddress"]).map(String::from);
    let created_at = ts_field(v, &["createdAt", "created_at", "creationDate"]);
    let updated_at = ts_field(v, &["updatedAt", "updated_at", "lastUpdate"]);
    Ok(OrderRecord {
        id,
        status_raw,
        status_label,
        customer_name,
        order_number,
        location,
        created_at,
        updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_aliased_fields() {
        let v = serde_json::json!({
            "_id": 12,
            "orderStatus": "pending",
            "customer": "M. Traoré",
            "reference": "CMD-12",
            "address": "Plateau",
            "createdAt": "2024-03-01T10:00:00Z",
        });
        let rec = order_from_json(&v).unwrap();
        assert_eq!(rec.id, "12");
        assert_eq!(rec.status_raw, "pending");
        assert_eq!(rec.customer_name.as_deref(), Some("M. Traoré"));
        assert_eq!(rec.order_number.as_deref(), Some("CMD-12"));
        assert_eq!(rec.location.as_deref(), Some("Plateau"));
        assert!(rec.created_at.is_some());
        assert!(rec.updated_at.is_none());
    }

    #[test]
    fn missing_id_is_an_error() {
        let v = serde_json::json!({ "status": "pending" });
        assert!(order_from_json(&v).is_err());
    }

    #[test]
    fn unwraps_enveloped_payloads_and_skips_bad_records() {
        let body = serde_json::json!({
            "orders": [
                { "id": "1", "status": "pending" },
                { "status": "no id here" },
                { "id": "2", "status": "delivered", "statusText": "Livrée" },
            ]
        });
        let recs = shape_feed(&body);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1].status_label.as_deref(), Some("Livrée"));
    }

    #[test]
    fn scalar_payload_yields_empty_feed() {
        assert!(shape_feed(&serde_json::json!("nope")).is_empty());
    }

    #[tokio::test]
    async fn static_feed_returns_latest_snapshot() {
        let feed = StaticFeed::new(vec![]);
        assert!(feed.fetch_orders().await.unwrap().is_empty());
        feed.set(vec![order_from_json(&serde_json::json!({"id": "1", "status": "pending"})).unwrap()]);
        assert_eq!(feed.fetch_orders().await.unwrap().len(), 1);
    }
}
