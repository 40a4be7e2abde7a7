use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use stackconfig::CurveSettings;
use tracing::debug;

use crate::texture::decode_data_url;
use crate::CurveId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("curve service is rate limiting requests")]
    RateLimited,
    #[error("curve service returned status {0}")]
    Status(u16),
    #[error("curve request failed: {0}")]
    Transport(String),
    #[error("unexpected curve payload: {0}")]
    Payload(String),
    #[error("curve service disabled (offline mode)")]
    Offline,
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

/// A curve image returned by the batch endpoint, still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCurve {
    pub id: CurveId,
    pub bytes: Vec<u8>,
}

/// Source of encoded curve images.
pub trait CurveService: Send + Sync {
    fn fetch_curve(&self, id: CurveId) -> Result<Vec<u8>, FetchError>;

    /// Up to `count` curves of the service's choosing.
    fn fetch_batch(&self, count: usize) -> Result<Vec<BatchCurve>, FetchError>;
}

/// Linear backoff for rate-limited requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }

    /// How long to wait before retrying after `attempt` failed with `err`.
    /// Only rate-limit responses are retried; `None` means give up.
    pub fn backoff_after(&self, attempt: u32, err: &FetchError) -> Option<Duration> {
        if err.is_rate_limited() && attempt < self.max_attempts {
            Some(self.delay_after(attempt))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct CurveClient {
    http: Client,
    endpoint: String,
    batch_endpoint: Option<Url>,
}

impl CurveClient {
    pub fn new(settings: &CurveSettings) -> Result<Self> {
        let endpoint = settings.endpoint.trim().to_string();
        if endpoint.is_empty() {
            bail!("curve endpoint must not be empty");
        }
        Url::parse(&endpoint).with_context(|| format!("invalid curve endpoint '{endpoint}'"))?;
        let batch_endpoint = settings
            .batch_endpoint
            .as_deref()
            .map(|raw| {
                Url::parse(raw.trim())
                    .with_context(|| format!("invalid curve batch endpoint '{raw}'"))
            })
            .transpose()?;
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building curve http client")?;
        Ok(Self {
            http,
            endpoint,
            batch_endpoint,
        })
    }

    /// The endpoint may be a proxy URL that already carries a query, so the
    /// id is appended verbatim rather than merged into the existing query.
    fn curve_url(&self, id: CurveId) -> Result<Url, FetchError> {
        Url::parse(&format!("{}?id={}", self.endpoint, id))
            .map_err(|err| FetchError::Transport(format!("invalid curve url: {err}")))
    }

    fn get_bytes(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        debug!(%url, "requesting curve");
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let bytes = response
            .bytes()
            .map_err(|err| FetchError::Transport(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
    id: u32,
    image: String,
}

fn parse_batch(body: &[u8]) -> Result<Vec<BatchCurve>, FetchError> {
    let entries: Vec<BatchEntry> =
        serde_json::from_slice(body).map_err(|err| FetchError::Payload(err.to_string()))?;
    entries
        .into_iter()
        .map(|entry| {
            let bytes = decode_data_url(&entry.image)
                .map_err(|err| FetchError::Payload(format!("curve {}: {err}", entry.id)))?;
            Ok(BatchCurve {
                id: CurveId(entry.id),
                bytes,
            })
        })
        .collect()
}

impl CurveService for CurveClient {
    fn fetch_curve(&self, id: CurveId) -> Result<Vec<u8>, FetchError> {
        let url = self.curve_url(id)?;
        self.get_bytes(url)
    }

    fn fetch_batch(&self, count: usize) -> Result<Vec<BatchCurve>, FetchError> {
        let Some(base) = &self.batch_endpoint else {
            return Err(FetchError::Payload("no batch endpoint configured".into()));
        };
        let mut url = base.clone();
        url.query_pairs_mut().append_pair("n", &count.to_string());
        let body = self.get_bytes(url)?;
        parse_batch(&body)
    }
}

/// Service used when network access is disabled; every fetch fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineService;

impl CurveService for OfflineService {
    fn fetch_curve(&self, _id: CurveId) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Offline)
    }

    fn fetch_batch(&self, _count: usize) -> Result<Vec<BatchCurve>, FetchError> {
        Err(FetchError::Offline)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    use super::*;
    use crate::texture::tests::gradient_png;

    struct TestServer {
        url: String,
        hits: Arc<AtomicUsize>,
        _handle: thread::JoinHandle<()>,
    }

    /// Serves `responses` in order, one per request, then stops.
    fn serve(responses: Vec<(u16, Vec<u8>)>) -> TestServer {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind test server");
        let port = server.server_addr().to_ip().expect("ip listener").port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let handle = thread::spawn(move || {
            for (status, body) in responses {
                let Ok(request) = server.recv() else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let response = tiny_http::Response::from_data(body).with_status_code(status);
                let _ = request.respond(response);
            }
        });
        TestServer {
            url: format!("http://127.0.0.1:{port}"),
            hits,
            _handle: handle,
        }
    }

    fn client_for(server: &TestServer) -> CurveClient {
        let settings = CurveSettings {
            endpoint: format!("{}/curve", server.url),
            batch_endpoint: Some(format!("{}/batch", server.url)),
            ..CurveSettings::default()
        };
        CurveClient::new(&settings).expect("client")
    }

    #[test]
    fn fetches_curve_bytes() {
        let png = gradient_png(16, 3);
        let server = serve(vec![(200, png.clone())]);
        let client = client_for(&server);
        let bytes = client.fetch_curve(CurveId(12)).expect("fetch");
        assert_eq!(bytes, png);
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn maps_429_to_rate_limited() {
        let server = serve(vec![(429, Vec::new())]);
        let client = client_for(&server);
        assert_eq!(
            client.fetch_curve(CurveId(1)).unwrap_err(),
            FetchError::RateLimited
        );
    }

    #[test]
    fn maps_other_failures_to_status() {
        let server = serve(vec![(503, Vec::new())]);
        let client = client_for(&server);
        assert_eq!(
            client.fetch_curve(CurveId(1)).unwrap_err(),
            FetchError::Status(503)
        );
    }

    #[test]
    fn parses_batch_payload() {
        let png = gradient_png(4, 9);
        let body = format!(
            r#"[{{"id": 5, "image": "data:image/png;base64,{}"}}, {{"id": 6, "image": "{}"}}]"#,
            STANDARD.encode(&png),
            STANDARD.encode(&png)
        );
        let server = serve(vec![(200, body.into_bytes())]);
        let client = client_for(&server);
        let batch = client.fetch_batch(2).expect("batch");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].id, CurveId(5));
        assert_eq!(batch[1].bytes, png);
    }

    #[test]
    fn rejects_malformed_batch() {
        assert!(matches!(
            parse_batch(b"{\"not\": \"a list\"}"),
            Err(FetchError::Payload(_))
        ));
    }

    #[test]
    fn rejects_empty_endpoint() {
        let settings = CurveSettings {
            endpoint: "  ".into(),
            ..CurveSettings::default()
        };
        assert!(CurveClient::new(&settings).is_err());
    }

    #[test]
    fn retry_backs_off_linearly_on_rate_limit() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        };
        let limited = FetchError::RateLimited;
        assert_eq!(policy.backoff_after(1, &limited), Some(Duration::from_millis(100)));
        assert_eq!(policy.backoff_after(2, &limited), Some(Duration::from_millis(200)));
        assert_eq!(policy.backoff_after(3, &limited), None);
    }

    #[test]
    fn retry_does_not_repeat_other_failures() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_after(1, &FetchError::Status(500)), None);
        assert_eq!(policy.backoff_after(1, &FetchError::Offline), None);
    }

    #[test]
    fn offline_service_always_fails() {
        assert_eq!(
            OfflineService.fetch_curve(CurveId(1)).unwrap_err(),
            FetchError::Offline
        );
    }
}
