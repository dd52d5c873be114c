//! `data:<mime>;base64,<payload>` strings

use std::sync::LazyLock;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use tracing::warn;

use super::buffer::adapt_buffer;
use super::{AdapterContext, AttachmentSource, Buffer, IoAdapter};
use crate::error::{AttachmentError, AttachmentResult};
use crate::readable::ReadableFile;

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\Adata:([-\w]+/[-\w+.]+)?;base64,(.*)\z").unwrap()
});

/// Filename given to decoded payloads
pub const DATA_URI_FILENAME: &str = "data";

/// Content type when the URI names none
pub const DATA_URI_DEFAULT_TYPE: &str = "text/plain";

/// Split a data URI into its content type and decoded payload. A payload
/// that fails to decode yields empty content.
pub fn parse(uri: &str) -> Option<(String, Vec<u8>)> {
    let captures = DATA_URI.captures(uri)?;
    let content_type = captures
        .get(1)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| DATA_URI_DEFAULT_TYPE.to_string());
    let payload: String = captures
        .get(2)
        .map(|m| m.as_str())
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let data = match STANDARD.decode(payload) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "Undecodable data URI payload, treating as empty");
            Vec::new()
        }
    };
    Some((content_type, data))
}

pub struct DataUriAdapter;

#[async_trait]
impl IoAdapter for DataUriAdapter {
    fn name(&self) -> &'static str {
        "data_uri"
    }

    fn handles(&self, source: &AttachmentSource) -> bool {
        source.as_text().map_or(false, |s| DATA_URI.is_match(s))
    }

    async fn adapt(
        &self,
        source: AttachmentSource,
        ctx: &AdapterContext,
    ) -> AttachmentResult<ReadableFile> {
        let text = match source {
            AttachmentSource::Text(text) => text,
            other => return Err(AttachmentError::NoHandler(other.describe())),
        };
        let (content_type, data) =
            parse(&text).unwrap_or_else(|| (DATA_URI_DEFAULT_TYPE.to_string(), Vec::new()));
        let buffer = Buffer::new(data)
            .filename(DATA_URI_FILENAME)
            .content_type(content_type);
        adapt_buffer(buffer, ctx).await
    }
}
