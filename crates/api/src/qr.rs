// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! QR image rendering.
//!
//! The image encodes the signed QR token itself; the scanning client
//! resolves it through the token validation endpoint. SVG keeps the image
//! crisp when projected or printed at arbitrary sizes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use qrcode::QrCode;
use qrcode::render::svg;

use crate::error::ApiError;

/// Minimum rendered dimensions, in SVG units.
const MIN_DIMENSIONS: u32 = 240;

/// Renders `data` as a QR code and returns the SVG document base64-encoded.
///
/// # Errors
///
/// Returns an error if the payload exceeds QR capacity.
pub fn qr_svg_base64(data: &str) -> Result<String, ApiError> {
    let code: QrCode = QrCode::new(data.as_bytes()).map_err(|e| ApiError::Internal {
        message: format!("QR encoding failed: {e}"),
    })?;
    let image: String = code
        .render::<svg::Color<'_>>()
        .min_dimensions(MIN_DIMENSIONS, MIN_DIMENSIONS)
        .build();
    Ok(STANDARD.encode(image.as_bytes()))
}
