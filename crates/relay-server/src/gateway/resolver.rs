//! DNS-over-HTTPS resolution using the JSON API.
//!
//! Query: `GET {endpoint}?name={domain}&type=A` with
//! `Accept: application/dns-json`. The answer is the `data` field of the
//! first entry whose `type` is 1 (A record).

use relay_core::{RelayError, RelayResult};
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// DNS record type for IPv4 host addresses.
const RECORD_TYPE_A: u16 = 1;

#[derive(Debug, Deserialize)]
struct DohResponse {
    #[serde(rename = "Status", default)]
    status: Option<u32>,
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type")]
    record_type: u16,
    data: String,
}

/// Resolver bound to one DoH endpoint. Cheap to share behind an `Arc`;
/// the inner HTTP client pools connections.
#[derive(Debug, Clone)]
pub struct DohResolver {
    client: reqwest::Client,
    endpoint: reqwest::Url,
}

impl DohResolver {
    /// Create a resolver for `endpoint`; every request is bounded by `timeout`.
    pub fn new(endpoint: &str, timeout: Duration) -> RelayResult<Self> {
        let endpoint = reqwest::Url::parse(endpoint)
            .map_err(|e| RelayError::Config(format!("invalid DoH endpoint {endpoint}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayError::Config(format!("failed to build DoH client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    /// Resolve `name` to the first IPv4 address in the answer section.
    ///
    /// # Errors
    ///
    /// [`RelayError::Resolution`] for an empty name, transport failure or
    /// timeout, non-2xx status, malformed JSON, an empty answer list, no A
    /// record, or an A record whose data is not an IPv4 literal.
    pub async fn resolve_ipv4(&self, name: &str) -> RelayResult<Ipv4Addr> {
        if name.is_empty() {
            return Err(RelayError::Resolution("empty domain name".into()));
        }
        let start = Instant::now();

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("name", name), ("type", "A")])
            .header(reqwest::header::ACCEPT, "application/dns-json")
            .send()
            .await
            .map_err(|e| {
                warn!(name = %name, error = %e, "DoH request failed");
                RelayError::Resolution(format!("DoH request failed for {name}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(name = %name, status = %status, "DoH http error");
            return Err(RelayError::Resolution(format!(
                "DoH http error for {name}: {status}"
            )));
        }

        let body: DohResponse = response.json().await.map_err(|e| {
            RelayError::Resolution(format!("invalid DoH response for {name}: {e}"))
        })?;

        let answer = body
            .answer
            .iter()
            .find(|a| a.record_type == RECORD_TYPE_A)
            .ok_or_else(|| {
                debug!(name = %name, status = ?body.status, answers = body.answer.len(), "no A record");
                RelayError::Resolution(format!("no A record found for {name}"))
            })?;

        let ip: Ipv4Addr = answer.data.trim().parse().map_err(|_| {
            RelayError::Resolution(format!(
                "A record for {name} is not an IPv4 address: {:?}",
                answer.data
            ))
        })?;

        debug!(
            name = %name,
            ip = %ip,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "resolved via DoH"
        );
        Ok(ip)
    }
}
