use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use retouch_contracts::blob::{is_image_mime, sniff_mime, ImageBlob, DEFAULT_IMAGE_NAME};
use retouch_contracts::errors::InputError;

const FETCH_TIMEOUT_S: u64 = 30;

/// Downloads an image by URL. Every failure comes back as an
/// [`InputError`] whose message is ready for the error banner.
pub fn fetch_image(http: &HttpClient, url: &str) -> Result<ImageBlob, InputError> {
    let parsed = Url::parse(url.trim())
        .map_err(|_| InputError::Fetch(format!("\"{}\" is not a valid image URL.", url.trim())))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(InputError::Fetch(format!(
            "Only http and https image URLs are supported (got {}).",
            parsed.scheme()
        )));
    }
    let name = name_from_url(&parsed);

    let response = http
        .get(parsed)
        .timeout(Duration::from_secs(FETCH_TIMEOUT_S))
        .send()
        .map_err(|err| InputError::Fetch(format!("Could not fetch the image: {err}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(InputError::Fetch(format!(
            "Could not fetch the image (HTTP {}).",
            status.as_u16()
        )));
    }
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|value| !value.is_empty());
    let bytes = response
        .bytes()
        .map_err(|err| InputError::Fetch(format!("Could not read the fetched image: {err}")))?
        .to_vec();

    let mime_type = match content_type {
        Some(mime) if is_image_mime(&mime) => mime,
        Some(mime) => {
            return Err(InputError::Fetch(format!(
                "The URL does not point to an image (content type {mime})."
            )))
        }
        None => match sniff_mime(&bytes) {
            Some(mime) => mime.to_string(),
            None => {
                return Err(InputError::Fetch(
                    "The URL does not point to an image.".to_string(),
                ))
            }
        },
    };
    ImageBlob::new(bytes, mime_type, name)
}

/// Last non-empty path segment, or the default image name.
pub fn name_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string())
}
