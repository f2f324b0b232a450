use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use tracing::debug;

use crate::config::RequestOptions;
use crate::error::{LabError, Result};
use crate::foundry::http::{client, send_with_retry};

const USER_AGENT: &str = "Mozilla/5.0";

/// Downloads an image and returns it as a `data:` URL.
pub async fn fetch_data_url(
    url: &str,
    fallback_format: &str,
    options: RequestOptions,
) -> Result<String> {
    let http = client(false)?;
    let response = send_with_retry("image download", options, || {
        http.get(url).header(reqwest::header::USER_AGENT, USER_AGENT)
    })
    .await?;
    let bytes = response
        .bytes()
        .await
        .map_err(LabError::request("image download"))?;
    debug!(url, size = bytes.len(), "downloaded image");

    encode_data_url(&bytes, fallback_format)
}

/// Encodes raw image bytes as `data:image/<format>;base64,<payload>`.
///
/// The format is sniffed from the bytes; `fallback_format` is used for
/// payloads the decoder does not recognise.
pub fn encode_data_url(bytes: &[u8], fallback_format: &str) -> Result<String> {
    if bytes.is_empty() {
        return Err(LabError::Image("image payload is empty".to_string()));
    }

    let format = image::guess_format(bytes)
        .ok()
        .and_then(mime_subtype)
        .unwrap_or(fallback_format);
    Ok(format!("data:image/{format};base64,{}", STANDARD.encode(bytes)))
}

fn mime_subtype(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpeg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        ImageFormat::Bmp => Some("bmp"),
        ImageFormat::Tiff => Some("tiff"),
        _ => None,
    }
}
