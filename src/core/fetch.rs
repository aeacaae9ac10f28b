use crate::config::FetchConfig;
use crate::core::image::{decode_bytes, ImageError};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Where a reference image lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CandidateRef {
    Local(PathBuf),
    Remote(String),
}

impl CandidateRef {
    /// `http://` and `https://` locators are remote, `file://` and anything
    /// else is a local path.
    pub fn parse(locator: &str) -> Self {
        let trimmed = locator.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            CandidateRef::Remote(trimmed.to_string())
        } else if lower.starts_with("file://") {
            CandidateRef::Local(PathBuf::from(&trimmed["file://".len()..]))
        } else {
            CandidateRef::Local(PathBuf::from(trimmed))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, CandidateRef::Remote(_))
    }
}

impl fmt::Display for CandidateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateRef::Local(path) => write!(f, "{}", path.display()),
            CandidateRef::Remote(url) => f.write_str(url),
        }
    }
}

impl FromStr for CandidateRef {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(CandidateRef::parse(s))
    }
}

impl From<String> for CandidateRef {
    fn from(s: String) -> Self {
        CandidateRef::parse(&s)
    }
}

impl From<CandidateRef> for String {
    fn from(candidate: CandidateRef) -> Self {
        candidate.to_string()
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Response larger than {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Timeout(_) => "timeout",
            _ => "fetch_error",
        }
    }

    /// Connection failures, timeouts and 5xx/429 responses are worth one
    /// more attempt; anything else will fail the same way again.
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_connect() || e.is_timeout(),
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
            FetchError::Timeout(_) => true,
            FetchError::TooLarge { .. } | FetchError::Io { .. } => false,
        }
    }
}

/// Everything that can take a single candidate out of the batch.
#[derive(Debug, Error)]
pub enum CandidateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Candidate image could not be decoded: {0}")]
    Decode(#[source] ImageError),

    #[error("Comparison cancelled")]
    Cancelled,

    #[error("Comparison task failed: {0}")]
    Internal(String),
}

impl CandidateError {
    pub fn code(&self) -> &'static str {
        match self {
            CandidateError::Fetch(e) => e.code(),
            CandidateError::Decode(_) => "decode_error",
            CandidateError::Cancelled => "cancelled",
            CandidateError::Internal(_) => "internal",
        }
    }
}

/// Resolves candidate locators into decoded images.
pub struct CandidateFetcher {
    client: reqwest::Client,
    timeout: Duration,
    retry_once: bool,
    max_bytes: u64,
}

impl CandidateFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            timeout,
            retry_once: config.retry_once,
            max_bytes: config.max_bytes,
        })
    }

    /// Fetch and decode one candidate.
    pub async fn fetch(&self, candidate: &CandidateRef) -> Result<DynamicImage, CandidateError> {
        let bytes = self.fetch_bytes(candidate).await?;
        tokio::task::spawn_blocking(move || decode_bytes(&bytes))
            .await
            .map_err(|e| CandidateError::Internal(e.to_string()))?
            .map_err(CandidateError::Decode)
    }

    pub async fn fetch_bytes(&self, candidate: &CandidateRef) -> Result<Vec<u8>, FetchError> {
        match candidate {
            CandidateRef::Local(path) => self.read_local(path).await,
            CandidateRef::Remote(url) => match self.download(url).await {
                Err(e) if self.retry_once && e.is_transient() => {
                    log::debug!("Retrying {} after transient failure: {}", url, e);
                    self.download(url).await
                }
                result => result,
            },
        }
    }

    async fn read_local(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
        let io_err = |source| FetchError::Io {
            path: path.display().to_string(),
            source,
        };
        let metadata = tokio::fs::metadata(path).await.map_err(io_err)?;
        if metadata.len() > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }
        tokio::fs::read(path).await.map_err(io_err)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut response = self.client.get(url).send().await.map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let declared = response.content_length().unwrap_or(0);
        if declared > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        // Bodies without a declared length are capped while streaming
        let mut body = Vec::with_capacity(declared as usize);
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(e))? {
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Http(err)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use image::{ImageBuffer, Rgb};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;

    fn fetcher() -> CandidateFetcher {
        CandidateFetcher::new(&FetchConfig::default()).unwrap()
    }

    /// Serves `app` on an ephemeral loopback port and returns its base URL.
    pub(crate) async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(16, 12, |x, y| Rgb([x as u8, y as u8, 0])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    /// Answers with `status` for the first `failures` hits, then with a PNG.
    fn flaky_route(status: StatusCode, failures: usize, hits: Arc<AtomicUsize>) -> Router {
        Router::new().route(
            "/page.png",
            get(move || {
                let hits = hits.clone();
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < failures {
                        (status, Vec::new())
                    } else {
                        (StatusCode::OK, png())
                    }
                }
            }),
        )
    }

    #[test]
    fn test_parse_locators() {
        assert_eq!(
            CandidateRef::parse("https://example.com/a.jpg"),
            CandidateRef::Remote("https://example.com/a.jpg".to_string())
        );
        assert_eq!(
            CandidateRef::parse("HTTP://example.com/a.jpg"),
            CandidateRef::Remote("HTTP://example.com/a.jpg".to_string())
        );
        assert_eq!(
            CandidateRef::parse("file:///tmp/a.jpg"),
            CandidateRef::Local(PathBuf::from("/tmp/a.jpg"))
        );
        assert_eq!(
            CandidateRef::parse(" images/book2.jpg "),
            CandidateRef::Local(PathBuf::from("images/book2.jpg"))
        );
        assert!(CandidateRef::parse("https://x").is_remote());
    }

    #[test]
    fn test_candidate_ref_serializes_as_string() {
        let candidate = CandidateRef::parse("https://example.com/a.jpg");
        let json = serde_json::to_string(&candidate).unwrap();
        assert_eq!(json, "\"https://example.com/a.jpg\"");

        let back: CandidateRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, candidate);
    }

    #[tokio::test]
    async fn test_fetch_local_image() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ref.png");
        ImageBuffer::from_fn(30, 20, |x, _| Rgb([x as u8, 0, 0]))
            .save(&path)
            .unwrap();

        let img = fetcher().fetch(&CandidateRef::Local(path)).await.unwrap();
        assert_eq!((img.width(), img.height()), (30, 20));
    }

    #[tokio::test]
    async fn test_fetch_missing_local_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = fetcher()
            .fetch(&CandidateRef::Local(temp_dir.path().join("nope.png")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "fetch_error");
    }

    #[tokio::test]
    async fn test_fetch_undecodable_local_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.png");
        fs::write(&path, b"plain text pretending to be a png").unwrap();

        let err = fetcher()
            .fetch(&CandidateRef::Local(path))
            .await
            .unwrap_err();
        assert!(matches!(err, CandidateError::Decode(_)));
        assert_eq!(err.code(), "decode_error");
    }

    #[tokio::test]
    async fn test_fetch_respects_size_limit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.bin");
        fs::write(&path, vec![0u8; 64]).unwrap();

        let config = FetchConfig {
            max_bytes: 16,
            ..FetchConfig::default()
        };
        let err = CandidateFetcher::new(&config)
            .unwrap()
            .fetch_bytes(&CandidateRef::Local(path))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn test_fetch_unreachable_remote() {
        // Port 9 on loopback is the discard service; nothing listens there
        let err = fetcher()
            .fetch(&CandidateRef::parse("http://127.0.0.1:9/missing.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, CandidateError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_unbounded_stream_is_cut_off_at_limit() {
        use futures::stream;

        // Endless body with no declared length
        let body = || {
            axum::body::Body::from_stream(stream::unfold((), |_| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Some((Ok::<_, std::io::Error>(vec![0u8; 4096]), ()))
            }))
        };
        let base = serve(Router::new().route("/endless", get(move || async move { body() }))).await;

        let config = FetchConfig {
            max_bytes: 1024,
            ..FetchConfig::default()
        };
        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            CandidateFetcher::new(&config)
                .unwrap()
                .fetch_bytes(&CandidateRef::parse(&format!("{}/endless", base))),
        )
        .await
        .expect("download was not cut off");

        assert!(matches!(result, Err(FetchError::TooLarge { limit: 1024 })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_transient_status_is_retried_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky_route(StatusCode::SERVICE_UNAVAILABLE, 1, hits.clone())).await;

        let img = fetcher()
            .fetch(&CandidateRef::parse(&format!("{}/page.png", base)))
            .await
            .unwrap();
        assert_eq!((img.width(), img.height()), (16, 12));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_retried_but_gives_up_after_second_failure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky_route(StatusCode::TOO_MANY_REQUESTS, 5, hits.clone())).await;

        let err = fetcher()
            .fetch_bytes(&CandidateRef::parse(&format!("{}/page.png", base)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 429, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky_route(StatusCode::NOT_FOUND, 1, hits.clone())).await;

        let err = fetcher()
            .fetch(&CandidateRef::parse(&format!("{}/page.png", base)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "fetch_error");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_can_be_disabled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve(flaky_route(StatusCode::BAD_GATEWAY, 1, hits.clone())).await;

        let config = FetchConfig {
            retry_once: false,
            ..FetchConfig::default()
        };
        let err = CandidateFetcher::new(&config)
            .unwrap()
            .fetch_bytes(&CandidateRef::parse(&format!("{}/page.png", base)))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 502, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_remote_times_out() {
        let base = serve(Router::new().route(
            "/slow.png",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                StatusCode::OK
            }),
        ))
        .await;

        let config = FetchConfig {
            timeout_secs: 1,
            retry_once: false,
            ..FetchConfig::default()
        };
        let started = Instant::now();
        let err = CandidateFetcher::new(&config)
            .unwrap()
            .fetch(&CandidateRef::parse(&format!("{}/slow.png", base)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "timeout");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_only_network_failures_are_transient() {
        let refused = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        assert!(FetchError::Http(refused).is_transient());

        let malformed = reqwest::Client::new()
            .get("http://exa mple.com/")
            .send()
            .await
            .unwrap_err();
        assert!(!FetchError::Http(malformed).is_transient());

        assert!(FetchError::Timeout(Duration::from_secs(1)).is_transient());
        let not_found = FetchError::Status {
            url: "http://x".to_string(),
            status: 404,
        };
        assert!(!not_found.is_transient());
    }
}
