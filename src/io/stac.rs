use crate::types::{
    AssetRef, BoundingBox, SceneItem, SearchCriteria, SitsError, SitsResult, MISSING_BASELINE,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// Hard cap on pages followed for a single search, as a runaway guard
const MAX_PAGES: usize = 1000;

/// A STAC API endpoint. Always passed explicitly to [`CatalogClient::new`];
/// there is no ambient default provider.
#[derive(Debug, Clone)]
pub struct StacProvider {
    pub name: String,
    pub endpoint: String,
}

impl StacProvider {
    pub fn new(name: &str, endpoint: &str) -> Self {
        Self {
            name: name.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    /// Microsoft Planetary Computer. Asset hrefs require SAS signing by the
    /// caller before they can be read.
    pub fn planetary_computer() -> Self {
        Self::new("mpc", "https://planetarycomputer.microsoft.com/api/stac/v1")
    }

    /// AWS Element84 earth-search
    pub fn earth_search() -> Self {
        Self::new("aws", "https://earth-search.aws.element84.com/v1")
    }
}

/// Client for a STAC-compliant search endpoint.
///
/// `search` handles pagination transparently and returns items sorted by
/// acquisition time ascending; callers never see partial pages.
pub struct CatalogClient {
    provider: StacProvider,
    client: reqwest::blocking::Client,
}

impl CatalogClient {
    pub fn new(provider: StacProvider) -> SitsResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| {
                SitsError::CatalogUnavailable(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { provider, client })
    }

    pub fn provider(&self) -> &StacProvider {
        &self.provider
    }

    /// Execute a paginated item search.
    ///
    /// Items sharing an identical acquisition timestamp (overlapping tile
    /// boundaries) are deduplicated, first id wins.
    pub fn search(&self, criteria: &SearchCriteria) -> SitsResult<Vec<SceneItem>> {
        criteria.validate()?;

        let search_url = format!("{}/search", self.provider.endpoint);
        let mut body = build_search_body(criteria);
        let mut url = search_url;
        let mut items = Vec::new();

        for page in 0..MAX_PAGES {
            log::debug!("STAC search page {} against {}", page + 1, url);
            let response = self
                .client
                .post(&url)
                .json(&Value::Object(body.clone()))
                .send()
                .map_err(|e| {
                    SitsError::CatalogUnavailable(format!("search request failed: {}", e))
                })?;

            if !response.status().is_success() {
                return Err(SitsError::CatalogUnavailable(format!(
                    "search returned HTTP {} from {}",
                    response.status(),
                    self.provider.name
                )));
            }

            let parsed: SearchPage = response.json().map_err(|e| {
                SitsError::CatalogUnavailable(format!("malformed search response: {}", e))
            })?;

            items.extend(parsed.features.iter().filter_map(scene_from_feature));

            match parsed.next_link() {
                Some(next) => {
                    if let Some(href) = &next.href {
                        url = href.clone();
                    }
                    if let Some(Value::Object(patch)) = &next.body {
                        merge_body(&mut body, patch);
                    }
                    // A next link without href or body would loop forever
                    if next.href.is_none() && next.body.is_none() {
                        break;
                    }
                }
                None => break,
            }
        }

        items.sort_by(|a, b| a.datetime.cmp(&b.datetime).then_with(|| a.id.cmp(&b.id)));
        log::info!(
            "search over {} [{} / {}] returned {} items",
            criteria.collection,
            criteria.start,
            criteria.end,
            items.len()
        );
        Ok(items)
    }
}

/// Assemble the POST /search body from validated criteria
fn build_search_body(criteria: &SearchCriteria) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("collections".to_string(), json!([criteria.collection]));
    body.insert("bbox".to_string(), json!(criteria.bbox.to_array()));
    body.insert(
        "datetime".to_string(),
        json!(format!(
            "{}/{}",
            criteria.start.format("%Y-%m-%dT%H:%M:%SZ"),
            criteria.end.format("%Y-%m-%dT%H:%M:%SZ")
        )),
    );
    body.insert("limit".to_string(), json!(criteria.page_limit));
    if let Some(ceiling) = criteria.max_cloud_cover {
        body.insert(
            "query".to_string(),
            json!({ "eo:cloud_cover": { "lt": ceiling } }),
        );
    }
    body
}

/// Fold a `next` link's body patch into the running request body,
/// per the STAC API pagination mechanism
fn merge_body(body: &mut Map<String, Value>, patch: &Map<String, Value>) {
    for (key, value) in patch {
        body.insert(key.clone(), value.clone());
    }
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    features: Vec<Feature>,
    #[serde(default)]
    links: Vec<Link>,
}

impl SearchPage {
    fn next_link(&self) -> Option<&Link> {
        self.links.iter().find(|l| l.rel == "next")
    }
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    #[serde(default)]
    href: Option<String>,
    #[serde(default)]
    body: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    #[serde(default)]
    bbox: Option<Vec<f64>>,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    assets: HashMap<String, Asset>,
}

#[derive(Debug, Deserialize)]
struct Asset {
    href: String,
    #[serde(default)]
    gsd: Option<f64>,
}

/// Convert one GeoJSON feature into a typed [`SceneItem`].
///
/// Features without a parseable datetime are dropped with a warning; other
/// missing metadata degrades to documented sentinels so downstream stages
/// stay total over their input.
fn scene_from_feature(feature: &Feature) -> Option<SceneItem> {
    let datetime = feature
        .properties
        .get("datetime")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let datetime = match datetime {
        Some(dt) => dt,
        None => {
            log::warn!("dropping item {} without a valid datetime", feature.id);
            return None;
        }
    };

    let processing_baseline = feature
        .properties
        .get("s2:processing_baseline")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or(MISSING_BASELINE);

    let cloud_cover = feature
        .properties
        .get("eo:cloud_cover")
        .and_then(Value::as_f64);

    let bbox = feature.bbox.as_deref().and_then(|b| match b {
        [min_lon, min_lat, max_lon, max_lat] => {
            Some(BoundingBox::new(*min_lon, *min_lat, *max_lon, *max_lat))
        }
        // 3D bbox with elevation bounds
        [min_lon, min_lat, _, max_lon, max_lat, _] => {
            Some(BoundingBox::new(*min_lon, *min_lat, *max_lon, *max_lat))
        }
        _ => None,
    });

    let assets = feature
        .assets
        .iter()
        .map(|(key, asset)| {
            (
                key.clone(),
                AssetRef { href: asset.href.clone(), gsd: asset.gsd },
            )
        })
        .collect();

    Some(SceneItem {
        id: feature.id.clone(),
        datetime,
        bbox,
        processing_baseline,
        cloud_cover,
        assets,
    })
}
