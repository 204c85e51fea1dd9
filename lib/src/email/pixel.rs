//! Open-tracking pixel.

use std::io::Cursor;
use std::sync::OnceLock;

use image::{ImageFormat, Rgba, RgbaImage};

use crate::Result;

static PIXEL: OnceLock<Vec<u8>> = OnceLock::new();

/// A fully transparent 1×1 png, encoded once.
pub fn png() -> &'static [u8] {
    PIXEL.get_or_init(|| {
        encode().unwrap_or_else(|e| {
            tracing::error!("failed encoding tracking pixel: {e}");
            Vec::new()
        })
    })
}

fn encode() -> Result<Vec<u8>> {
    let image = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 0]));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// Builds the link served by the tracking endpoint for a given token.
pub fn url(frontend_url: &str, tracking_path: &str, tracking_id: &str) -> String {
    format!(
        "{}/{}/{}",
        frontend_url.trim_end_matches('/'),
        tracking_path.trim_matches('/'),
        tracking_id
    )
}

/// Embeds the pixel in an html body, right before `</body>` when there is
/// one.
pub fn embed(html: &str, url: &str) -> String {
    let tag = format!(
        r#"<img src="{url}" width="1" height="1" style="display:none;" alt="" />"#
    );
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], tag, &html[pos..]),
        None => format!("{html}{tag}"),
    }
}
