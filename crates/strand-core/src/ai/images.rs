//! Image attachment loading
//!
//! Resolves user-supplied image references (local paths, `data:` URLs and
//! HTTPS URLs) into inline image parts. Bad references are dropped with a
//! warning instead of failing the whole message.

use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::ai::types::Part;
use crate::constants::{self, images};

/// `data:<mime>;base64,<payload>`
static DATA_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^data:([^;,]+);base64,(.*)$").unwrap());

/// Resolve up to `MAX_IMAGE_COUNT` references into image parts, in order
pub async fn resolve_images(references: &[String]) -> Vec<Part> {
    let mut references = references;
    if references.len() > images::MAX_IMAGE_COUNT {
        tracing::warn!(
            provided = references.len(),
            max = images::MAX_IMAGE_COUNT,
            "Too many images provided, only processing the first {}",
            images::MAX_IMAGE_COUNT
        );
        references = &references[..images::MAX_IMAGE_COUNT];
    }

    let mut parts = Vec::with_capacity(references.len());
    for reference in references {
        match load_image(reference).await {
            Ok(part) => parts.push(part),
            Err(e) => {
                tracing::warn!(image = %display_name(reference), error = %e, "Failed to process image, skipping");
            }
        }
    }
    parts
}

/// Load a single image reference
pub async fn load_image(reference: &str) -> Result<Part> {
    if reference.starts_with("https://") {
        return load_from_url(reference).await;
    }
    if reference.starts_with("http://") {
        bail!("HTTP URLs are not supported for security reasons, use HTTPS only");
    }
    if reference.starts_with("data:") {
        return load_from_data_url(reference);
    }
    let path = reference.strip_prefix("file://").unwrap_or(reference);
    load_from_path(Path::new(path)).await
}

/// Load image from a local file. The size limit is checked before reading.
pub async fn load_from_path(path: &Path) -> Result<Part> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata,
        _ => bail!("Image file not found: {}", path.display()),
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let media_type = image_media_type(&ext).ok_or_else(|| {
        anyhow::anyhow!(
            "Unsupported image format for file: {} (supported: .jpg, .jpeg, .png, .gif, .webp)",
            path.display()
        )
    })?;

    check_size(usize::try_from(metadata.len()).unwrap_or(usize::MAX))?;

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image file: {}", path.display()))?;
    check_size(bytes.len())?;

    Ok(inline_part(media_type, &bytes))
}

/// Decode a base64 `data:` URL
pub fn load_from_data_url(data_url: &str) -> Result<Part> {
    let captures = DATA_URL
        .captures(data_url)
        .ok_or_else(|| anyhow::anyhow!("Invalid data URL: must contain ';base64,' separator"))?;

    let mime = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let payload = captures.get(2).map(|m| m.as_str()).unwrap_or_default();

    let media_type = supported_mime(mime).ok_or_else(|| {
        anyhow::anyhow!(
            "Unsupported image mime type: {} (supported: jpeg, png, gif, webp)",
            mime
        )
    })?;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .context("Failed to decode base64 image data")?;
    check_size(bytes.len())?;

    Ok(inline_part(media_type, &bytes))
}

/// Fetch an image over HTTPS. Redirects must stay on the original host.
pub async fn load_from_url(url: &str) -> Result<Part> {
    let parsed = url::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    if parsed.scheme() != "https" {
        bail!("Only HTTPS URLs are supported: {}", url);
    }
    let origin_host = parsed.host_str().unwrap_or_default().to_string();

    let policy = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= images::MAX_REDIRECTS {
            return attempt.error("stopped after 10 redirects");
        }
        match attempt.url().host_str() {
            Some(host) if host == origin_host => attempt.follow(),
            other => {
                let target = other.unwrap_or_default().to_string();
                attempt.error(format!("redirect to different domain not allowed: {}", target))
            }
        }
    });

    let client = reqwest::Client::builder()
        .redirect(policy)
        .timeout(constants::IMAGE_FETCH_TIMEOUT)
        .user_agent(concat!("strand/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(parsed.clone())
        .send()
        .await
        .with_context(|| format!("Failed to fetch image from URL: {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("HTTP error {} when fetching image from {}", status, url);
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    if !content_type.starts_with("image/") {
        bail!("URL does not return an image, got content-type: {}", content_type);
    }

    if let Some(len) = response.content_length() {
        check_size(len as usize)?;
    }
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read image data from URL: {}", url))?;
    check_size(bytes.len())?;

    // Prefer the URL extension, fall back to the declared content type
    let ext = Path::new(parsed.path())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let media_type = image_media_type(&ext)
        .or_else(|| supported_mime(&content_type))
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Unsupported image format from URL {}: {} (supported: jpeg, png, gif, webp)",
                url,
                content_type
            )
        })?;

    Ok(inline_part(media_type, &bytes))
}

fn inline_part(media_type: &str, bytes: &[u8]) -> Part {
    Part::Image {
        mime_type: media_type.to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(bytes),
    }
}

fn check_size(len: usize) -> Result<()> {
    if len > images::MAX_IMAGE_BYTES {
        bail!(
            "Image too large: {} bytes (max {} bytes)",
            len,
            images::MAX_IMAGE_BYTES
        );
    }
    Ok(())
}

/// Get image media type from file extension
fn image_media_type(ext: &str) -> Option<&'static str> {
    match ext {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Normalize a declared MIME type (may carry parameters) to a supported one
fn supported_mime(mime: &str) -> Option<&'static str> {
    let lower = mime.to_ascii_lowercase();
    images::SUPPORTED_MIME_TYPES
        .iter()
        .copied()
        .find(|supported| lower.contains(supported))
}

fn display_name(reference: &str) -> String {
    if reference.starts_with("data:") {
        return "<inline data>".to_string();
    }
    if reference.chars().count() > 60 {
        let truncated: String = reference.chars().take(57).collect();
        format!("{}...", truncated)
    } else {
        reference.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    #[tokio::test]
    async fn test_load_from_path_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shot.PNG");
        std::fs::write(&path, PNG_BYTES).unwrap();

        let part = load_from_path(&path).await.unwrap();
        match part {
            Part::Image { mime_type, data } => {
                assert_eq!(mime_type, "image/png");
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .unwrap();
                assert_eq!(decoded, PNG_BYTES);
            }
            other => panic!("unexpected part: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_from_path_rejects_unsupported_and_missing() {
        let dir = TempDir::new().unwrap();
        let bmp = dir.path().join("a.bmp");
        std::fs::write(&bmp, b"BM").unwrap();

        assert!(load_from_path(&bmp).await.is_err());
        assert!(load_from_path(&dir.path().join("missing.png")).await.is_err());
        assert!(load_from_path(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_load_from_path_rejects_oversized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.jpg");
        std::fs::write(&path, vec![0u8; images::MAX_IMAGE_BYTES + 1]).unwrap();

        let err = load_from_path(&path).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_data_url() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(PNG_BYTES);
        let part = load_from_data_url(&format!("data:image/png;base64,{}", encoded)).unwrap();
        assert!(matches!(part, Part::Image { ref mime_type, .. } if mime_type == "image/png"));

        assert!(load_from_data_url("data:image/png,abc").is_err());
        assert!(load_from_data_url("data:text/plain;base64,aGk=").is_err());
        assert!(load_from_data_url("data:image/png;base64,@@@").is_err());
    }

    #[tokio::test]
    async fn test_http_rejected() {
        let err = load_image("http://example.com/a.png").await.unwrap_err();
        assert!(err.to_string().contains("HTTPS"));
    }

    #[tokio::test]
    async fn test_resolve_drops_failures_and_caps_count() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("ok.gif");
        std::fs::write(&good, b"GIF89a").unwrap();
        let good = good.to_string_lossy().to_string();

        let mut refs = vec![
            "http://insecure.example/x.png".to_string(),
            format!("file://{}", good),
        ];
        refs.extend(std::iter::repeat(good.clone()).take(12));

        let parts = resolve_images(&refs).await;
        // 10 considered, the first one fails
        assert_eq!(parts.len(), images::MAX_IMAGE_COUNT - 1);
    }
}
