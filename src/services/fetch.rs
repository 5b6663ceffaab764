// Image download by URL

use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::core::errors::{FetchError, FetchResult};

/// Download `url`, accepting only successful `image/*` responses
#[instrument(skip(client))]
pub async fn fetch_image(client: &reqwest::Client, url: &str, timeout: Duration) -> FetchResult<Vec<u8>> {
    let timeout_err = |e: reqwest::Error| {
        if e.is_timeout() {
            FetchError::Timeout(timeout.as_millis() as u64)
        } else {
            FetchError::Request(e)
        }
    };

    let response = client.get(url).timeout(timeout).send().await.map_err(timeout_err)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if !content_type.starts_with("image/") {
        return Err(FetchError::NotAnImage(content_type));
    }

    let bytes = response.bytes().await.map_err(timeout_err)?;
    debug!("Fetched {} bytes ({})", bytes.len(), content_type);
    Ok(bytes.to_vec())
}

/// First http(s) URL in free text, without trailing punctuation
pub fn extract_first_url(text: &str) -> Option<&str> {
    text.split_whitespace()
        .find(|word| word.starts_with("http://") || word.starts_with("https://"))
        .map(|word| word.trim_end_matches([')', ']', ',', '.', '!', '?']))
        .filter(|url| !url.ends_with("://"))
}
