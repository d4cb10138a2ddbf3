use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::instrument;

use crate::models::GeoRecord;

/// Field mask requesting every attribute the lookup API offers, including
/// the proxy and hosting flags.
const IP_API_FIELDS: u32 = 66846719;

/// Advisory network-origin lookup. Never fails upward: `None` means unknown.
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, address: &str) -> Option<GeoRecord>;
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    isp: Option<String>,
    #[serde(default)]
    proxy: Option<bool>,
    #[serde(default)]
    hosting: Option<bool>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// ip-api.com style lookup: `GET {base_url}/{address}?fields=...`.
pub struct IpApiResolver {
    client: Client,
    base_url: String,
}

impl IpApiResolver {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn lookup(&self, address: &str) -> Result<IpApiResponse, String> {
        let url = format!(
            "{}/{}?fields={}",
            self.base_url,
            urlencoding::encode(address),
            IP_API_FIELDS
        );

        let response = self
            .client
            .traced_get(&url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("status {}", response.status()));
        }

        response
            .json::<IpApiResponse>()
            .await
            .map_err(|e| format!("malformed body: {}", e))
    }
}

#[async_trait]
impl GeoResolver for IpApiResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, address: &str) -> Option<GeoRecord> {
        if !is_routable(address) {
            tracing::debug!("Skipping geo lookup for non-routable address");
            return None;
        }

        match self.lookup(address).await {
            Ok(body) if body.status == "success" => {
                let record = to_record(address, body);
                tracing::debug!(
                    country = record.country.as_deref().unwrap_or("unknown"),
                    city = record.city.as_deref().unwrap_or("unknown"),
                    proxy = record.is_proxy,
                    hosting = record.is_hosting,
                    "Geo lookup resolved"
                );
                Some(record)
            }
            Ok(body) => {
                tracing::warn!(
                    message = body.message.as_deref().unwrap_or("unknown"),
                    "Geo lookup rejected"
                );
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Geo lookup failed");
                None
            }
        }
    }
}

fn to_record(address: &str, body: IpApiResponse) -> GeoRecord {
    let map_link = match (body.lat, body.lon) {
        (Some(lat), Some(lon)) => Some(format!("https://www.google.com/maps?q={},{}", lat, lon)),
        _ => None,
    };

    GeoRecord {
        address: body.query.unwrap_or_else(|| address.to_string()),
        country: body.country,
        city: body.city,
        isp: body.isp,
        is_proxy: body.proxy.unwrap_or(false),
        is_hosting: body.hosting.unwrap_or(false),
        map_link,
    }
}

/// Loopback, unspecified, private, link-local and carrier-grade NAT ranges
/// have no public location. Unparseable input is left to the lookup service
/// to reject.
fn is_routable(address: &str) -> bool {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => !is_local_v4(ip),
        Ok(IpAddr::V6(ip)) => match ip.to_ipv4_mapped() {
            Some(mapped) => !is_local_v4(mapped),
            None => !is_local_v6(ip),
        },
        Err(_) => !address.trim().is_empty(),
    }
}

fn is_local_v4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    // 100.64.0.0/10
    let shared = a == 100 && (b & 0xC0) == 64;
    ip.is_loopback() || ip.is_unspecified() || ip.is_private() || ip.is_link_local() || shared
}

fn is_local_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link-local
    let unique_local = (first & 0xfe00) == 0xfc00;
    let link_local = (first & 0xffc0) == 0xfe80;
    ip.is_loopback() || ip.is_unspecified() || unique_local || link_local
}
