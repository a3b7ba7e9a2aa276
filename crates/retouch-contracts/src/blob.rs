use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::errors::InputError;
use crate::hotspot::Dims;

pub const DEFAULT_IMAGE_NAME: &str = "image.png";
const DEFAULT_INLINE_MIME: &str = "image/png";

/// An immutable encoded image plus the metadata needed to ship it to a
/// provider and back. Cloning is cheap; the bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlob {
    bytes: Arc<[u8]>,
    mime_type: String,
    name: String,
}

impl ImageBlob {
    pub fn new(
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, InputError> {
        let mime_type = mime_type.into().trim().to_ascii_lowercase();
        if !is_image_mime(&mime_type) {
            return Err(InputError::NotAnImage { mime_type });
        }
        let name = name.into();
        let name = if name.trim().is_empty() {
            DEFAULT_IMAGE_NAME.to_string()
        } else {
            name
        };
        Ok(Self {
            bytes: Arc::from(bytes),
            mime_type,
            name,
        })
    }

    /// Builds a blob whose MIME type is taken from the magic bytes.
    pub fn sniffed(bytes: Vec<u8>, name: impl Into<String>) -> Result<Self, InputError> {
        let Some(mime_type) = sniff_mime(&bytes) else {
            return Err(InputError::NotAnImage {
                mime_type: String::new(),
            });
        };
        Self::new(bytes, mime_type, name)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or(DEFAULT_IMAGE_NAME)
            .to_string();
        let mime_type = sniff_mime(&bytes)
            .map(str::to_string)
            .or_else(|| mime_for_path(path).map(str::to_string))
            .unwrap_or_default();
        Ok(Self::new(bytes, mime_type, name)?)
    }

    /// Decodes the `inlineData` payload of a provider response part.
    pub fn from_inline_data(data: &str, mime_type: Option<&str>, name: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .context("inline image base64 decode failed")?;
        let mime_type = mime_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .or_else(|| sniff_mime(&bytes).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_INLINE_MIME.to_string());
        Ok(Self::new(bytes, mime_type, name)?)
    }

    pub fn to_inline_part(&self) -> Value {
        json!({
            "inlineData": {
                "mimeType": self.mime_type,
                "data": BASE64.encode(&self.bytes),
            }
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let mut out = self.clone();
        let name = name.into();
        if !name.trim().is_empty() {
            out.name = name;
        }
        out
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        hex::encode(hasher.finalize())
    }

    pub fn short_id(&self) -> String {
        self.digest()[..12].to_string()
    }

    pub fn extension(&self) -> &'static str {
        extension_for_mime(&self.mime_type)
    }

    /// File name with the extension swapped to match the MIME type, so a
    /// `photo.jpg` that came back from the provider as PNG saves as
    /// `photo.png`.
    pub fn file_name(&self) -> String {
        let stem = Path::new(&self.name)
            .file_stem()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("image");
        format!("{stem}.{}", self.extension())
    }

    /// Natural pixel dimensions, read from the image header.
    pub fn dimensions(&self) -> Result<Dims> {
        let (width, height) = image::ImageReader::new(Cursor::new(self.bytes()))
            .with_guessed_format()
            .context("image format detection failed")?
            .into_dimensions()
            .with_context(|| format!("failed reading dimensions of {}", self.name))?;
        Ok(Dims::new(width as f64, height as f64))
    }
}

impl fmt::Debug for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBlob")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.trim().to_ascii_lowercase().starts_with("image/")
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        _ => None,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    if lowered.contains("bmp") {
        return "bmp";
    }
    if lowered.contains("tiff") {
        return "tiff";
    }
    "png"
}

#[cfg(test)]
pub(crate) mod testing {
    use super::ImageBlob;

    /// A tiny blob with a PNG signature; enough for MIME sniffing.
    pub(crate) fn blob(name: &str, tag: u8) -> ImageBlob {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.push(tag);
        ImageBlob::new(bytes, "image/png", name).unwrap()
    }
}
