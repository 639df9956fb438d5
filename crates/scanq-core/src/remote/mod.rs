pub mod http;

pub use http::HttpScanService;

use thiserror::Error;

use crate::credentials::Credentials;
use crate::digest::ContentDigest;

/// Opaque reference to a finished scan report, as returned by the service.
#[derive(Clone, PartialEq, Eq)]
pub struct ReportRef(pub String);

impl ReportRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReportRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for ReportRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReportRef({})", self.0)
    }
}

/// Failure modes of a single remote call. The scheduler maps these onto
/// state transitions; they never propagate out of the engine as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Server-side 429. `retry_after_ms` comes from the `Retry-After`
    /// header or the `retryAfterSeconds` body field when either is present.
    #[error("rate limited by server")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Artifact bytes for an upload request, with an optional hook that
/// observes the cumulative byte count as the body streams out.
pub struct UploadBody<'a> {
    pub bytes: &'a [u8],
    pub on_chunk: Option<&'a mut dyn FnMut(u64)>,
}

impl<'a> UploadBody<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        UploadBody {
            bytes,
            on_chunk: None,
        }
    }

    pub fn with_chunk_hook(bytes: &'a [u8], on_chunk: &'a mut dyn FnMut(u64)) -> Self {
        UploadBody {
            bytes,
            on_chunk: Some(on_chunk),
        }
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Remote scan service contract.
///
/// `lookup` asks whether the service already has a report for the digest.
/// Small artifacts go through `upload`; artifacts above the configured
/// threshold fetch a dedicated URL via `upload_url` and stream to it with
/// `upload_to`.
pub trait ScanService: Send {
    fn lookup(
        &self,
        creds: &Credentials,
        digest: &ContentDigest,
    ) -> std::result::Result<Option<ReportRef>, RemoteError>;

    fn upload(
        &self,
        creds: &Credentials,
        body: UploadBody<'_>,
    ) -> std::result::Result<ReportRef, RemoteError>;

    fn upload_url(&self, creds: &Credentials) -> std::result::Result<String, RemoteError>;

    fn upload_to(
        &self,
        creds: &Credentials,
        url: &str,
        body: UploadBody<'_>,
    ) -> std::result::Result<ReportRef, RemoteError>;
}
