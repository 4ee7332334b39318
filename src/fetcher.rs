//! HTTP retrieval and parsing of the listings feed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, RotationMode, SearchConfig};
use crate::models::{Listing, ListingDetails, ParsedListing};
use crate::utils::AppError;
use crate::Result;

const BLOCK_MARKERS: [&str; 4] = ["captcha", "shieldsquare", "access denied", "are you for real"];

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub listings: Vec<Listing>,
    /// First 16 hex chars of the SHA-256 of the response body.
    pub response_hash: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingFetcher: Send {
    async fn fetch(&mut self) -> Result<FetchOutcome>;
}

/// Picks the user agent for each request from a fixed, ordered list.
pub struct HeaderRotation {
    agents: Vec<String>,
    mode: RotationMode,
    cursor: usize,
    rng: StdRng,
}

impl HeaderRotation {
    pub fn new(agents: &[String], mode: RotationMode, seed: Option<u64>) -> Self {
        let agents = agents
            .iter()
            .map(|agent| agent.trim())
            .filter(|agent| !agent.is_empty())
            .map(str::to_string)
            .collect();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            agents,
            mode,
            cursor: 0,
            rng,
        }
    }

    pub fn next_user_agent(&mut self) -> Option<&str> {
        if self.agents.is_empty() {
            return None;
        }

        let index = match self.mode {
            RotationMode::Sequential => {
                let index = self.cursor % self.agents.len();
                self.cursor = self.cursor.wrapping_add(1);
                index
            }
            RotationMode::Random => self.rng.gen_range(0..self.agents.len()),
        };

        self.agents.get(index).map(String::as_str)
    }
}

pub struct HttpFetcher {
    client: Client,
    api: ApiConfig,
    query: Vec<(String, String)>,
    rotation: HeaderRotation,
}

impl HttpFetcher {
    pub fn new(api: &ApiConfig, search: &SearchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &api.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| config::ConfigError::Message(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| config::ConfigError::Message(format!("Invalid header value for {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(api.request_timeout))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            api: api.clone(),
            query: search.query_pairs(),
            rotation: HeaderRotation::new(&api.user_agents, api.rotation, api.rotation_seed),
        })
    }
}

#[async_trait]
impl ListingFetcher for HttpFetcher {
    async fn fetch(&mut self) -> Result<FetchOutcome> {
        let mut request = self.client.get(&self.api.url).query(&self.query);
        if let Some(agent) = self.rotation.next_user_agent() {
            debug!("Using user agent: {}", agent);
            request = request.header(USER_AGENT, agent);
        }

        let response = request.send().await?;
        let status = response.status();
        match status {
            StatusCode::FORBIDDEN => {
                return Err(AppError::Network("request blocked by the server (HTTP 403)".into()));
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(AppError::Network("rate limited by the server (HTTP 429)".into()));
            }
            s if !s.is_success() => {
                return Err(AppError::Network(format!("unexpected status {}", s)));
            }
            _ => {}
        }

        let body = response.text().await?;
        if looks_blocked(&body) {
            warn!("Response looks like an anti-bot page");
            return Err(AppError::Network("anti-bot block page received".into()));
        }

        let listings = parse_listings(&body, &self.api, Utc::now())?;
        info!("Fetched {} listings", listings.len());

        Ok(FetchOutcome {
            listings,
            response_hash: response_hash(&body),
        })
    }
}

pub fn response_hash(body: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(body.as_bytes()));
    digest[..16].to_string()
}

/// A non-JSON body that mentions a captcha or block page near the start.
fn looks_blocked(body: &str) -> bool {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return false;
    }
    let head: String = trimmed.chars().take(2048).collect::<String>().to_lowercase();
    BLOCK_MARKERS.iter().any(|marker| head.contains(marker))
}

/// Parse a response body into listings, dropping repeated ids after the
/// first occurrence.
pub fn parse_listings(body: &str, api: &ApiConfig, seen_at: DateTime<Utc>) -> Result<Vec<Listing>> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| AppError::parse(format!("malformed JSON: {}", e)))?;
    let items = locate_items(&root, api.data_path.as_deref())?;

    let mut seen = HashSet::new();
    let mut listings = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let parsed = parse_item(item, position, api.url_template.as_deref())?;
        if !seen.insert(parsed.id.clone()) {
            debug!("Dropping duplicate listing {} at position {}", parsed.id, position);
            continue;
        }
        listings.push(Listing::observed(parsed, seen_at));
    }

    Ok(listings)
}

fn locate_items<'a>(root: &'a Value, data_path: Option<&str>) -> Result<&'a Vec<Value>> {
    let mut node = root;
    if let Some(path) = data_path.filter(|p| !p.trim().is_empty()) {
        for segment in path.split('.') {
            node = node
                .get(segment)
                .ok_or_else(|| AppError::parse(format!("data path `{}` not found at `{}`", path, segment)))?;
        }
    }

    node.as_array()
        .ok_or_else(|| AppError::parse("expected a JSON array of listings"))
}

fn parse_item(item: &Value, position: usize, url_template: Option<&str>) -> Result<ParsedListing> {
    if !item.is_object() {
        return Err(AppError::parse(format!("listing at position {} is not an object", position)));
    }
    let missing = |field: &str| AppError::parse(format!("listing at position {} is missing `{}`", position, field));

    let id = ["id", "token"]
        .iter()
        .find_map(|key| item.get(*key).and_then(text_value))
        .ok_or_else(|| missing("id"))?;

    let price = item
        .get("price")
        .and_then(number_value)
        .map(|price| price.round() as i64)
        .ok_or_else(|| missing("price"))?;

    let rooms = item
        .get("rooms")
        .or_else(|| item.pointer("/additionalDetails/roomsCount"))
        .and_then(number_value)
        .ok_or_else(|| missing("rooms"))?;

    let url = match item.get("url").and_then(Value::as_str) {
        Some(url) if !url.trim().is_empty() => url.to_string(),
        _ => url_template
            .map(|template| template.replace("{id}", &id))
            .ok_or_else(|| missing("url"))?,
    };

    Ok(ParsedListing {
        address: address_of(item),
        details: details_of(item),
        id,
        price,
        rooms,
        url,
        raw: item.clone(),
    })
}

fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Accepts numbers and strings like "4,500 ₪" or "3.5".
fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
            cleaned.trim_matches('.').parse().ok()
        }
        _ => None,
    }
}

fn details_of(item: &Value) -> ListingDetails {
    let pointer = |paths: &[&str]| paths.iter().find_map(|path| item.pointer(path));

    ListingDetails {
        size_sqm: pointer(&["/size_sqm", "/additionalDetails/squareMeter"]).and_then(number_value),
        floor: pointer(&["/floor", "/address/house/floor"]).and_then(text_value),
        property_type: pointer(&["/property_type", "/additionalDetails/property/text"]).and_then(text_value),
        condition: pointer(&["/condition", "/additionalDetails/propertyCondition"]).and_then(condition_label),
        image_url: pointer(&["/image_url", "/metaData/coverImage"]).and_then(text_value),
    }
}

// Plain text, an object with `text`, or an object with a numeric `id`.
fn condition_label(value: &Value) -> Option<String> {
    if let Some(text) = text_value(value).or_else(|| value.get("text").and_then(text_value)) {
        return Some(text);
    }

    let label = match value.get("id").and_then(Value::as_u64)? {
        1 => "new",
        2 => "renovated",
        3 => "needs renovation",
        4 => "poor",
        _ => return None,
    };
    Some(label.to_string())
}

fn address_of(item: &Value) -> Option<String> {
    match item.get("address")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        address @ Value::Object(_) => {
            let street = address.pointer("/street/text").and_then(Value::as_str);
            let house = address.pointer("/house/number").and_then(text_value);
            let street = match (street, house) {
                (Some(street), Some(house)) => Some(format!("{} {}", street, house)),
                (Some(street), None) => Some(street.to_string()),
                _ => None,
            };

            let parts: Vec<String> = [
                street,
                address.pointer("/neighborhood/text").and_then(text_value),
                address.pointer("/city/text").and_then(text_value),
            ]
            .into_iter()
            .flatten()
            .collect();

            (!parts.is_empty()).then(|| parts.join(", "))
        }
        _ => None,
    }
}
