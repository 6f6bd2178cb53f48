use std::io::Cursor;

use image::{ImageFormat, Luma};
use qrcode::{render::unicode::Dense1x2, QrCode};

use crate::{errors::Error, Result};

/// Minimum edge length of the PNG served to browsers.
pub const PNG_MIN_SIZE: u32 = 256;

fn encode(data: &str) -> Result<QrCode> {
    QrCode::new(data.as_bytes()).map_err(|e| Error::External(format!("qr encode failed: {e}")))
}

/// PNG bytes for `data`, with quiet zone.
pub fn render_png(data: &str) -> Result<Vec<u8>> {
    let img = encode(data)?
        .render::<Luma<u8>>()
        .quiet_zone(true)
        .min_dimensions(PNG_MIN_SIZE, PNG_MIN_SIZE)
        .build();

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| Error::External(format!("png encode failed: {e}")))?;
    Ok(out.into_inner())
}

/// Compact half-block rendering for terminals.
pub fn render_terminal(data: &str) -> Result<String> {
    Ok(encode(data)?
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
