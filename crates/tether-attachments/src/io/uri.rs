//! Remote `http(s)://` URLs

use std::io::Write;

use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use tracing::{debug, instrument};
use url::Url;

use super::{AdapterContext, AttachmentSource, IoAdapter};
use crate::content_type::{essence, from_extension};
use crate::error::{AttachmentError, AttachmentResult};
use crate::readable::{temp_file_for, ReadableFile};

/// Filename used when the URL path has no usable last segment
pub const DEFAULT_FILENAME: &str = "index.html";

/// Whether `text` looks like an `http(s)` URL
pub fn is_remote_url(text: &str) -> bool {
    let lower = text.get(..8).unwrap_or(text).to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && Url::parse(text).is_ok()
}

/// Filename for a fetched URL: `Content-Disposition` first, then the last
/// path segment, then [`DEFAULT_FILENAME`].
pub fn filename_for(url: &Url, headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_filename)
        .or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|segment| !segment.is_empty())
                .map(|segment| percent_decode(segment))
        })
        .unwrap_or_else(|| DEFAULT_FILENAME.to_string())
}

/// Content type for a fetched URL: response header, else by extension
pub fn content_type_for(filename: &str, headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(essence)
        .unwrap_or_else(|| from_extension(filename))
}

fn disposition_filename(value: &str) -> Option<String> {
    value.split(';').map(str::trim).find_map(|part| {
        part.strip_prefix("filename=")
            .map(|name| name.trim_matches('"').to_string())
            .filter(|name| !name.is_empty())
    })
}

fn percent_decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

pub struct UriAdapter;

impl UriAdapter {
    #[instrument(skip(ctx))]
    async fn fetch(url: &str, ctx: &AdapterContext) -> AttachmentResult<ReadableFile> {
        let parsed = Url::parse(url).map_err(|e| AttachmentError::NoHandler(e.to_string()))?;
        let fetch_error = |source| AttachmentError::Fetch {
            url: url.to_string(),
            source,
        };

        let mut response = ctx
            .http
            .get(parsed.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_error)?;

        let filename = filename_for(&parsed, response.headers());
        let content_type = content_type_for(&filename, response.headers());

        let mut temp = temp_file_for(&filename)?;
        while let Some(chunk) = response.chunk().await.map_err(fetch_error)? {
            temp.write_all(&chunk)?;
        }
        temp.flush()?;

        let file = ReadableFile::from_temp(temp, filename, content_type)?;
        debug!(size = file.size(), content_type = file.content_type(), "Fetched remote file");
        Ok(file)
    }
}

#[async_trait]
impl IoAdapter for UriAdapter {
    fn name(&self) -> &'static str {
        "uri"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        source.as_text().map_or(false, is_remote_url)
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        match source {
            AttachmentSource::Text(url) => Self::fetch(&url, ctx).await,
            other => Err(AttachmentError::NoHandler(other.describe())),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::content_type::ExtensionDetector;

    /// Answer a single request on loopback with `headers` and `body`
    async fn serve_once(headers: &'static str, body: Vec<u8>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let mut response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n{}\r\n",
                body.len(),
                headers
            )
            .into_bytes();
            response.extend_from_slice(&body);
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        addr
    }

    fn local_context() -> AdapterContext {
        AdapterContext {
            detector: Arc::new(ExtensionDetector),
            http: reqwest::Client::builder().no_proxy().build().unwrap(),
        }
    }

    fn png_body(len: usize) -> Vec<u8> {
        let mut body = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        body.resize(len, 0x42);
        body
    }

    #[test]
    fn test_is_remote_url() {
        assert!(is_remote_url("http://example.com/a.png"));
        assert!(is_remote_url("HTTPS://example.com"));
        assert!(!is_remote_url("ftp://example.com/a.png"));
        assert!(!is_remote_url("/var/tmp/a.png"));
        assert!(!is_remote_url("http://"));
    }

    #[test]
    fn test_filename_from_path() {
        let headers = HeaderMap::new();
        let url = Url::parse("https://example.com/images/my%20logo.png?size=large").unwrap();
        assert_eq!(filename_for(&url, &headers), "my logo.png");

        let url = Url::parse("https://example.com/files/a+b=c.png").unwrap();
        assert_eq!(filename_for(&url, &headers), "a+b=c.png");

        let url = Url::parse("https://example.com/").unwrap();
        assert_eq!(filename_for(&url, &headers), DEFAULT_FILENAME);
    }

    #[test]
    fn test_filename_from_disposition() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("attachment; filename=\"report.pdf\""),
        );
        let url = Url::parse("https://example.com/download?id=4").unwrap();
        assert_eq!(filename_for(&url, &headers), "report.pdf");
    }

    #[test]
    fn test_content_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(content_type_for("logo.png", &headers), "image/png");
        assert_eq!(content_type_for("blob", &headers), "application/octet-stream");

        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("image/jpeg; charset=binary"),
        );
        assert_eq!(content_type_for("logo.png", &headers), "image/jpeg");
    }

    #[tokio::test]
    async fn test_fetch_uses_response_content_type() {
        let body = png_body(40 * 1024);
        let addr = serve_once("Content-Type: image/png\r\n", body.clone()).await;
        let url = format!("http://{}/images/logo?v=2", addr);

        let file = UriAdapter
            .adapt(AttachmentSource::Text(url), &local_context())
            .await
            .unwrap();
        assert_eq!(file.original_filename(), "logo");
        assert_eq!(file.content_type(), "image/png");
        assert_eq!(file.size(), body.len() as u64);
        assert!(file.is_temporary());
        assert_eq!(file.bytes().await.unwrap().as_ref(), body.as_slice());
    }

    #[tokio::test]
    async fn test_fetch_falls_back_to_extension() {
        let body = png_body(512);
        let addr = serve_once("", body.clone()).await;
        let url = format!("http://{}/files/a+b.png", addr);

        let file = UriAdapter
            .adapt(AttachmentSource::Text(url), &local_context())
            .await
            .unwrap();
        assert_eq!(file.original_filename(), "a+b.png");
        assert_eq!(file.content_type(), "image/png");
        assert_eq!(file.size(), 512);
    }

    #[tokio::test]
    async fn test_unreachable_url_is_a_fetch_error() {
        let registry = super::super::IoRegistry::default();
        let result = registry
            .resolve("http://127.0.0.1:1/missing.png".into())
            .await;
        assert!(matches!(result, Err(AttachmentError::Fetch { .. })));
    }
}
