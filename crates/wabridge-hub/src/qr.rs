//! QR rendering: PNG for the HTTP page, Unicode blocks for the terminal.

use std::io::Cursor;

use base64::Engine;
use image::{ImageFormat, Luma};
use qrcode::QrCode;

use wabridge_core::error::{BridgeError, Result};

/// Side length of the rendered PNG.
const PNG_SIZE: u32 = 512;

/// Render a QR token as a PNG image.
pub fn render_png(token: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(token.as_bytes())
        .map_err(|e| BridgeError::Other(format!("QR encode failed: {}", e)))?;
    let img = code
        .render::<Luma<u8>>()
        .min_dimensions(PNG_SIZE, PNG_SIZE)
        .build();

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| BridgeError::Other(format!("PNG encode failed: {}", e)))?;
    Ok(buf.into_inner())
}

/// `data:` URL for embedding a PNG in HTML.
pub fn png_data_url(png: &[u8]) -> String {
    format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(png)
    )
}

/// Render a QR token as Unicode half blocks, two rows per line, with the
/// 4-module quiet zone scanners need.
pub fn render_terminal(token: &str) -> Option<String> {
    let code = QrCode::new(token.as_bytes()).ok()?;
    let colors = code.to_colors();
    let w = code.width();
    let quiet = 4;
    let total = w + quiet * 2;

    let dark = |x: usize, y: usize| -> bool {
        if x < quiet || x >= quiet + w || y < quiet || y >= quiet + w {
            false
        } else {
            colors[(y - quiet) * w + (x - quiet)] == qrcode::Color::Dark
        }
    };

    let mut out = String::new();
    for y in (0..total).step_by(2) {
        for x in 0..total {
            let top = dark(x, y);
            let bottom = y + 1 < total && dark(x, y + 1);
            out.push(match (top, bottom) {
                (false, false) => ' ',
                (true, true) => '\u{2588}',
                (true, false) => '\u{2580}',
                (false, true) => '\u{2584}',
            });
        }
        out.push('\n');
    }
    Some(out)
}
