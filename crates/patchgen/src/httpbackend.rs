use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use patch::{patch_from_npy, Coordinate, Patch, RegionBounds};

use crate::backend::{
    BandStats, CollectionRef, PatchRequest, PointQuery, PointRow, RasterBackend, RegionStats,
    SessionFactory, StratifiedQuery,
};
use crate::error::FetchError;

/// Connection settings for the raster service.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub endpoint: String,
    /// Separate endpoint for bulk traffic, used when `use_high_volume` is
    /// set.
    pub high_volume_endpoint: Option<String>,
    pub use_high_volume: bool,
    /// JSON file holding the API key, anonymous sessions when absent.
    pub credentials: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl BackendConfig {
    pub fn for_endpoint(endpoint: impl Into<String>) -> BackendConfig {
        BackendConfig {
            endpoint: endpoint.into(),
            high_volume_endpoint: None,
            use_high_volume: false,
            credentials: None,
            request_timeout: Duration::from_secs(120),
        }
    }

    fn base_url(&self) -> &str {
        if self.use_high_volume {
            if let Some(endpoint) = &self.high_volume_endpoint {
                return endpoint;
            }
        }

        &self.endpoint
    }
}

/// Blocking HTTP session against the raster service, one bearer token per
/// session.
pub struct HttpRasterBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRasterBackend {
    /// Open an authenticated session against the configured endpoint.
    pub fn connect(config: &BackendConfig) -> Result<HttpRasterBackend, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(transport)?;

        let key = config
            .credentials
            .as_deref()
            .map(read_credential_key)
            .transpose()?;

        let mut backend = HttpRasterBackend {
            client,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            token: None,
        };

        let response = check_status(backend.post("/v1/session", &SessionBody { key })?)?;
        let session: SessionResponse = response.json().map_err(payload)?;
        backend.token = Some(session.token);
        log::debug!("Opened session against {}", backend.base_url);

        Ok(backend)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Response, FetchError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request.send().map_err(transport)
    }
}

impl RasterBackend for HttpRasterBackend {
    fn collection_size(&self, collection: &CollectionRef) -> Result<u64, FetchError> {
        let body = CollectionBody::from(collection);
        let response = check_status(self.post("/v1/collection/size", &body)?)?;
        let size: SizeResponse = response.json().map_err(payload)?;
        Ok(size.size)
    }

    fn sample_coordinate(
        &self,
        collection: &CollectionRef,
        index: u64,
    ) -> Result<Coordinate, FetchError> {
        let body = FeatureBody {
            collection: CollectionBody::from(collection),
            index,
        };
        let response = self.post("/v1/collection/feature", &body)?;
        if response.status() == StatusCode::NOT_FOUND {
            let size = response
                .json::<ErrorResponse>()
                .map(|error| error.size)
                .unwrap_or_default();
            return Err(FetchError::OutOfRange { index, size });
        }

        let response = check_status(response)?;
        let feature: FeatureResponse = response.json().map_err(payload)?;
        Ok(Coordinate::latlon(feature.latitude, feature.longitude))
    }

    fn fetch_patch(&self, image: &str, request: &PatchRequest) -> Result<Patch, FetchError> {
        let body = PatchBody::new(image, request);
        let response = check_status(self.post("/v1/image/patch", &body)?)?;
        let data = response.bytes().map_err(transport)?;
        let patch = patch_from_npy(&data, request.bands.clone(), request.size)?;
        Ok(patch)
    }

    fn compute_patch(&self, image: &str, request: &PatchRequest) -> Result<Patch, FetchError> {
        let body = PatchBody::new(image, request);
        let response = check_status(self.post("/v1/image/pixels", &body)?)?;
        let data = response.bytes().map_err(transport)?;
        let patch = patch_from_npy(&data, request.bands.clone(), request.size)?;
        Ok(patch)
    }

    fn image_bands(&self, image: &str) -> Result<Vec<String>, FetchError> {
        let response = check_status(self.post("/v1/image/bands", &ImageBody { image })?)?;
        let bands: BandsResponse = response.json().map_err(payload)?;
        Ok(bands.bands)
    }

    fn region_stats(
        &self,
        image: &str,
        bounds: &RegionBounds,
        scale_m: f64,
    ) -> Result<RegionStats, FetchError> {
        let body = StatsBody {
            image,
            region: RegionBody::from(bounds),
            scale: scale_m,
        };
        let response = check_status(self.post("/v1/image/stats", &body)?)?;
        let stats: StatsResponse = response.json().map_err(payload)?;

        let bands = stats
            .bands
            .into_iter()
            .map(|(name, band)| {
                (
                    name,
                    BandStats {
                        min: band.min,
                        max: band.max,
                        mean: band.mean,
                    },
                )
            })
            .collect();
        Ok(RegionStats { bands })
    }

    fn sample_points(&self, image: &str, query: &PointQuery) -> Result<Vec<PointRow>, FetchError> {
        let body = SampleBody {
            image,
            collection: CollectionBody::from(&query.collection),
            properties: &query.properties,
            scale: query.scale_m,
        };
        let response = check_status(self.post("/v1/image/sample", &body)?)?;
        let sample: SampleResponse = response.json().map_err(payload)?;

        Ok(sample
            .rows
            .into_iter()
            .map(|row| PointRow { values: row.values })
            .collect())
    }

    fn stratified_sample(
        &self,
        image: &str,
        query: &StratifiedQuery,
    ) -> Result<String, FetchError> {
        let body = StratifiedBody {
            image,
            class_band: &query.class_band,
            points_per_class: query.points_per_class,
            scale: query.scale_m,
            seed: query.seed,
            region: query.region.as_ref().map(RegionBody::from),
        };
        let response = check_status(self.post("/v1/collection/stratified", &body)?)?;
        let stratified: StratifiedResponse = response.json().map_err(payload)?;
        Ok(stratified.collection)
    }
}

/// Opens one [`HttpRasterBackend`] session per pipeline worker.
pub struct HttpSessionFactory {
    config: BackendConfig,
}

impl HttpSessionFactory {
    pub fn new(config: BackendConfig) -> HttpSessionFactory {
        HttpSessionFactory { config }
    }
}

impl SessionFactory for HttpSessionFactory {
    type Backend = HttpRasterBackend;

    fn open_session(&self) -> Result<HttpRasterBackend, FetchError> {
        HttpRasterBackend::connect(&self.config)
    }
}

fn check_status(response: Response) -> Result<Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchError::RateLimited(message));
    }

    Err(FetchError::Status {
        status: status.as_u16(),
        message,
    })
}

fn transport(err: reqwest::Error) -> FetchError {
    FetchError::Transport(err.to_string())
}

fn payload(err: reqwest::Error) -> FetchError {
    FetchError::Payload(err.to_string())
}

fn read_credential_key(path: &Path) -> Result<String, FetchError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        FetchError::Payload(format!("Cannot read credentials {}: {}", path.display(), err))
    })?;
    let credentials: Credentials = serde_json::from_str(&raw).map_err(|err| {
        FetchError::Payload(format!("Malformed credentials {}: {}", path.display(), err))
    })?;

    Ok(credentials.key)
}

#[derive(Deserialize)]
struct Credentials {
    key: String,
}

#[derive(Serialize)]
struct SessionBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

#[derive(Deserialize)]
struct SessionResponse {
    token: String,
}

#[derive(Serialize)]
struct CollectionBody<'a> {
    collection: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<FilterBody>,
}

impl<'a> From<&'a CollectionRef> for CollectionBody<'a> {
    fn from(collection: &'a CollectionRef) -> CollectionBody<'a> {
        CollectionBody {
            collection: &collection.collection,
            filter: collection.filter.map(|filter| FilterBody {
                seed: filter.seed,
                gt: filter.gt,
                lte: filter.lte,
            }),
        }
    }
}

#[derive(Serialize)]
struct FilterBody {
    seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    gt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lte: Option<f64>,
}

#[derive(Deserialize)]
struct SizeResponse {
    size: u64,
}

#[derive(Serialize)]
struct FeatureBody<'a> {
    #[serde(flatten)]
    collection: CollectionBody<'a>,
    index: u64,
}

#[derive(Deserialize)]
struct FeatureResponse {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    size: u64,
}

#[derive(Serialize)]
struct PatchBody<'a> {
    image: &'a str,
    bands: &'a [String],
    latitude: f64,
    longitude: f64,
    scale: f64,
    size: usize,
    region: RegionBody,
}

impl<'a> PatchBody<'a> {
    fn new(image: &'a str, request: &'a PatchRequest) -> PatchBody<'a> {
        PatchBody {
            image,
            bands: &request.bands,
            latitude: request.coordinate.latitude,
            longitude: request.coordinate.longitude,
            scale: request.scale_m,
            size: request.size,
            region: RegionBody::from(&request.region().bounds()),
        }
    }
}

#[derive(Serialize)]
struct RegionBody {
    west: f64,
    south: f64,
    east: f64,
    north: f64,
}

impl From<&RegionBounds> for RegionBody {
    fn from(bounds: &RegionBounds) -> RegionBody {
        RegionBody {
            west: bounds.west,
            south: bounds.south,
            east: bounds.east,
            north: bounds.north,
        }
    }
}

#[derive(Serialize)]
struct ImageBody<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct BandsResponse {
    bands: Vec<String>,
}

#[derive(Serialize)]
struct StatsBody<'a> {
    image: &'a str,
    region: RegionBody,
    scale: f64,
}

#[derive(Deserialize)]
struct StatsResponse {
    bands: BTreeMap<String, BandStatsBody>,
}

#[derive(Deserialize)]
struct BandStatsBody {
    min: f64,
    max: f64,
    mean: f64,
}

#[derive(Serialize)]
struct SampleBody<'a> {
    image: &'a str,
    #[serde(flatten)]
    collection: CollectionBody<'a>,
    properties: &'a [String],
    scale: f64,
}

#[derive(Deserialize)]
struct SampleResponse {
    rows: Vec<RowBody>,
}

#[derive(Deserialize)]
struct RowBody {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct StratifiedBody<'a> {
    image: &'a str,
    class_band: &'a str,
    points_per_class: u64,
    scale: f64,
    seed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<RegionBody>,
}

#[derive(Deserialize)]
struct StratifiedResponse {
    collection: String,
}
