use std::io::Read;
use std::time::Duration;

use serde::Deserialize;

use crate::credentials::Credentials;
use crate::digest::ContentDigest;
use crate::remote::{RemoteError, ReportRef, ScanService, UploadBody};

/// HTTP client for the remote scan service.
pub struct HttpScanService {
    /// Base URL, e.g. "https://scan.example.com/api"
    base_url: String,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct ReportResponse {
    #[serde(rename = "reportRef")]
    report_ref: String,
}

#[derive(Deserialize)]
struct UploadUrlResponse {
    url: String,
}

#[derive(Deserialize)]
struct RateLimitBody {
    #[serde(rename = "retryAfterSeconds")]
    retry_after_seconds: Option<u64>,
}

impl HttpScanService {
    pub fn new(base_url: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url, path)
    }

    /// Stream the artifact body to `url`, invoking the chunk hook with the
    /// cumulative byte count as the socket accepts data.
    fn post_body(
        &self,
        url: &str,
        creds: &Credentials,
        body: UploadBody<'_>,
    ) -> std::result::Result<ReportRef, RemoteError> {
        let len = body.len();
        let reader = CountingReader {
            remaining: body.bytes,
            sent: 0,
            on_chunk: body.on_chunk,
        };
        let resp = self
            .agent
            .post(url)
            .set("x-apikey", &creds.api_key)
            .set("Content-Type", "application/octet-stream")
            .set("Content-Length", &len.to_string())
            .send(reader)
            .map_err(classify)?;
        parse_report(resp)
    }
}

impl ScanService for HttpScanService {
    fn lookup(
        &self,
        creds: &Credentials,
        digest: &ContentDigest,
    ) -> std::result::Result<Option<ReportRef>, RemoteError> {
        let url = self.url(&format!("lookup/{digest}"));
        match self.agent.get(&url).set("x-apikey", &creds.api_key).call() {
            Ok(resp) => parse_report(resp).map(Some),
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(e) => Err(classify(e)),
        }
    }

    fn upload(
        &self,
        creds: &Credentials,
        body: UploadBody<'_>,
    ) -> std::result::Result<ReportRef, RemoteError> {
        self.post_body(&self.url("files"), creds, body)
    }

    fn upload_url(&self, creds: &Credentials) -> std::result::Result<String, RemoteError> {
        let url = self.url("upload-url");
        let resp = self
            .agent
            .get(&url)
            .set("x-apikey", &creds.api_key)
            .call()
            .map_err(classify)?;
        let val: UploadUrlResponse = resp
            .into_json()
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        Ok(val.url)
    }

    fn upload_to(
        &self,
        creds: &Credentials,
        url: &str,
        body: UploadBody<'_>,
    ) -> std::result::Result<ReportRef, RemoteError> {
        self.post_body(url, creds, body)
    }
}

struct CountingReader<'a> {
    remaining: &'a [u8],
    sent: u64,
    on_chunk: Option<&'a mut dyn FnMut(u64)>,
}

impl Read for CountingReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = Read::read(&mut self.remaining, buf)?;
        if n > 0 {
            self.sent += n as u64;
            if let Some(hook) = self.on_chunk.as_mut() {
                hook(self.sent);
            }
        }
        Ok(n)
    }
}

fn parse_report(resp: ureq::Response) -> std::result::Result<ReportRef, RemoteError> {
    let val: ReportResponse = resp
        .into_json()
        .map_err(|e| RemoteError::Malformed(e.to_string()))?;
    Ok(ReportRef(val.report_ref))
}

fn classify(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(429, resp) => {
            let header = resp.header("Retry-After").map(|h| h.to_string());
            let body = resp.into_string().unwrap_or_default();
            RemoteError::RateLimited {
                retry_after_ms: parse_retry_after(header.as_deref(), &body),
            }
        }
        ureq::Error::Status(code, _) => RemoteError::Status(code),
        ureq::Error::Transport(t) => RemoteError::Transport(t.to_string()),
    }
}

/// Extract the server-advised wait from a 429 response. The `Retry-After`
/// header (delay-seconds form) takes precedence over the
/// `retryAfterSeconds` body field.
fn parse_retry_after(header: Option<&str>, body: &str) -> Option<u64> {
    if let Some(secs) = header.and_then(|h| h.trim().parse::<u64>().ok()) {
        return Some(secs * 1000);
    }
    serde_json::from_str::<RateLimitBody>(body)
        .ok()
        .and_then(|b| b.retry_after_seconds)
        .map(|secs| secs * 1000)
}
