use std::{collections::BTreeMap, future::Future, pin::Pin, time::Duration};

use reqwest::{StatusCode, Url};
use serde::Deserialize;

const CONNECT_TIMEOUT_CAP: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRecord {
    pub id: String,
    pub name: Option<String>,
    pub version_code: u64,
    /// Sorted, de-duplicated signing certificate hashes joined with `,`.
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    /// Seconds since the epoch at which the repository published this index.
    pub timestamp: Option<i64>,
    /// Sorted by id.
    pub apps: Vec<AppRecord>,
}

#[derive(Debug)]
pub enum FetchError {
    Transport { url: String, source: reqwest::Error },
    Status { url: String, status: StatusCode },
    Decode { url: String, source: serde_json::Error },
    Schema { url: String, details: String },
}

impl FetchError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Status { .. } => "status",
            Self::Decode { .. } => "decode",
            Self::Schema { .. } => "schema",
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport { url, source } => {
                if source.is_timeout() {
                    write!(f, "request to {url} timed out: {source}")
                } else {
                    write!(f, "request to {url} failed: {source}")
                }
            }
            Self::Status { url, status } => write!(f, "{url} returned HTTP {status}"),
            Self::Decode { url, source } => write!(f, "invalid JSON from {url}: {source}"),
            Self::Schema { url, details } => write!(f, "unexpected feed from {url}: {details}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport { source, .. } => Some(source),
            Self::Decode { source, .. } => Some(source),
            Self::Status { .. } | Self::Schema { .. } => None,
        }
    }
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<FeedSnapshot, FetchError>> + 'a>>;

pub trait FeedSource {
    fn fetch(&self) -> FetchFuture<'_>;
    fn endpoint(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(default)]
    timestamp: Option<i64>,
    apps: BTreeMap<String, RawApp>,
}

#[derive(Debug, Deserialize)]
struct RawApp {
    #[serde(default)]
    name: Option<String>,
    min_version_code: u64,
    signing_cert_hashes: Vec<String>,
}

pub fn canonical_fingerprint<S: AsRef<str>>(hashes: &[S]) -> String {
    let mut hashes: Vec<&str> = hashes
        .iter()
        .map(|h| h.as_ref().trim())
        .filter(|h| !h.is_empty())
        .collect();
    hashes.sort_unstable();
    hashes.dedup();
    hashes.join(",")
}

/// Strictly decodes a repository index. Any app entry missing its version code
/// or signing certificate hashes rejects the whole document.
pub fn decode_feed(url: &str, body: &[u8]) -> Result<FeedSnapshot, FetchError> {
    let raw: RawFeed = serde_json::from_slice(body).map_err(|source| {
        if source.is_data() {
            FetchError::Schema {
                url: url.to_string(),
                details: source.to_string(),
            }
        } else {
            FetchError::Decode {
                url: url.to_string(),
                source,
            }
        }
    })?;

    let mut apps = Vec::with_capacity(raw.apps.len());
    for (id, app) in raw.apps {
        if id.trim().is_empty() {
            return Err(FetchError::Schema {
                url: url.to_string(),
                details: "app with empty id".to_string(),
            });
        }
        let fingerprint = canonical_fingerprint(&app.signing_cert_hashes);
        if fingerprint.is_empty() {
            return Err(FetchError::Schema {
                url: url.to_string(),
                details: format!("app {id} has no signing certificate hashes"),
            });
        }
        apps.push(AppRecord {
            id,
            name: app.name,
            version_code: app.min_version_code,
            fingerprint,
        });
    }

    Ok(FeedSnapshot {
        timestamp: raw.timestamp,
        apps,
    })
}

#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpFeed {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(crate::version::user_agent())
            .connect_timeout(std::cmp::min(timeout, CONNECT_TIMEOUT_CAP))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, endpoint })
    }

    pub async fn fetch_once(&self) -> Result<FeedSnapshot, FetchError> {
        let url = self.endpoint.as_str();
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };

        let resp = self
            .client
            .get(self.endpoint.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if status != StatusCode::OK {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = resp.bytes().await.map_err(transport)?;
        decode_feed(url, &body)
    }
}

impl FeedSource for HttpFeed {
    fn fetch(&self) -> FetchFuture<'_> {
        Box::pin(self.fetch_once())
    }

    fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_body() -> serde_json::Value {
        serde_json::json!({
            "timestamp": 1_700_000_000,
            "apps": {
                "app.b": {
                    "name": "Bee",
                    "min_version_code": 7,
                    "signing_cert_hashes": ["ff01", "aa02", "ff01"],
                    "icon": "ignored.png"
                },
                "app.a": {
                    "min_version_code": 1,
                    "signing_cert_hashes": ["X"]
                }
            }
        })
    }

    #[test]
    fn decodes_apps_sorted_with_canonical_fingerprints() {
        let body = serde_json::to_vec(&sample_body()).unwrap();
        let feed = decode_feed("http://feed", &body).unwrap();

        assert_eq!(feed.timestamp, Some(1_700_000_000));
        assert_eq!(
            feed.apps,
            vec![
                AppRecord {
                    id: "app.a".to_string(),
                    name: None,
                    version_code: 1,
                    fingerprint: "X".to_string(),
                },
                AppRecord {
                    id: "app.b".to_string(),
                    name: Some("Bee".to_string()),
                    version_code: 7,
                    fingerprint: "aa02,ff01".to_string(),
                },
            ]
        );
    }

    #[test]
    fn fingerprint_ignores_hash_order() {
        assert_eq!(
            canonical_fingerprint(&["b", "a"]),
            canonical_fingerprint(&["a", "b", " a "])
        );
    }

    #[test]
    fn missing_fingerprint_rejects_feed() {
        let body = br#"{"apps": {"app.a": {"min_version_code": 1}}}"#;
        let err = decode_feed("http://feed", body).unwrap_err();
        assert_eq!(err.kind(), "schema");
        assert!(err.to_string().contains("signing_cert_hashes"));
    }

    #[test]
    fn empty_hash_list_rejects_feed() {
        let body = br#"{"apps": {"app.a": {"min_version_code": 1, "signing_cert_hashes": []}}}"#;
        let err = decode_feed("http://feed", body).unwrap_err();
        assert_eq!(err.kind(), "schema");
        assert!(err.to_string().contains("app.a"));
    }

    #[test]
    fn missing_apps_key_rejects_feed() {
        let err = decode_feed("http://feed", br#"{"timestamp": 1}"#).unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = decode_feed("http://feed", b"{\"apps\": ").unwrap_err();
        assert_eq!(err.kind(), "decode");
    }

    #[tokio::test]
    async fn fetch_returns_decoded_feed_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repodata.0.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_body()))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/repodata.0.json", server.uri())).unwrap();
        let feed = HttpFeed::new(url, Duration::from_secs(5)).unwrap();
        let snapshot = feed.fetch().await.unwrap();

        assert_eq!(snapshot.apps.len(), 2);
        assert_eq!(snapshot.apps[0].id, "app.a");
    }

    #[tokio::test]
    async fn fetch_maps_non_200_to_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let feed = HttpFeed::new(url, Duration::from_secs(5)).unwrap();
        let err = feed.fetch().await.unwrap_err();

        assert_eq!(err.kind(), "status");
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn fetch_times_out_on_slow_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(sample_body())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let feed = HttpFeed::new(url, Duration::from_millis(200)).unwrap();
        let err = feed.fetch().await.unwrap_err();

        assert_eq!(err.kind(), "transport");
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn fetch_rejects_non_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let feed = HttpFeed::new(url, Duration::from_secs(5)).unwrap();
        let err = feed.fetch().await.unwrap_err();

        assert_eq!(err.kind(), "decode");
    }
}
