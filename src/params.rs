//! Transform Params (C2, spec §4.2).
//!
//! Parses the URL tail after the resolved source path (`<WxH>` and
//! `<format>` segments) plus the `quality` query parameter into a
//! normalized [`TransformParams`] record. Parsing is graceful by contract:
//! malformed dimensions or an unknown format never fail the request, they
//! fall back to defaults.

use serde::Deserialize;

use crate::config::ImageFormat;

pub const DEFAULT_WIDTH: u32 = 1000;
pub const DEFAULT_HEIGHT: u32 = 1000;
pub const DEFAULT_QUALITY: u8 = 95;
pub const MAX_DIMENSION: u32 = 4000;

/// `quality` is deserialized as a raw string, not `Option<u8>`, so that a
/// malformed value (non-numeric, out of range) degrades to "use the
/// default" rather than making axum's `Query` extractor reject the whole
/// request with a 400 --- image endpoints never 4xx on bad parameters
/// (spec §4.2, §8 property 8).
#[derive(Debug, Deserialize, Default)]
pub struct ImageQuery {
    pub quality: Option<String>,
}

impl ImageQuery {
    pub fn parsed_quality(&self) -> Option<u8> {
        self.quality.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformParams {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub quality: u8,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            format: ImageFormat::webp,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl TransformParams {
    /// Canonical encoding used as fingerprint input: field order is fixed
    /// and there is no extra whitespace (spec §4.2).
    pub fn normalized_encoding(&self) -> String {
        format!(
            "wxh:{}x{};fmt:{};q:{}",
            self.width, self.height, self.format, self.quality
        )
    }

    /// Parse the `<WxH>` path segment, if present. Returns `None` (meaning
    /// "use defaults") on any parse failure or out-of-range value --- this
    /// never produces an error the caller must propagate.
    fn parse_dimensions(segment: Option<&str>) -> Option<(u32, u32)> {
        let segment = segment?;
        let (w_str, h_str) = segment.split_once('x')?;
        let w: u32 = w_str.parse().ok()?;
        let h: u32 = h_str.parse().ok()?;
        if w == 0 || h == 0 || w > MAX_DIMENSION || h > MAX_DIMENSION {
            return None;
        }
        Some((w, h))
    }

    fn parse_format(segment: Option<&str>) -> ImageFormat {
        match segment.map(|s| s.to_ascii_lowercase()).as_deref() {
            Some("jpg") | Some("jpeg") => ImageFormat::jpeg,
            Some("png") => ImageFormat::png,
            Some("webp") => ImageFormat::webp,
            _ => ImageFormat::webp,
        }
    }

    /// Build a normalized record from the raw `<WxH>`/`<format>` URL tail
    /// segments and the optional `quality` query parameter.
    pub fn from_request(
        dims_segment: Option<&str>,
        format_segment: Option<&str>,
        quality: Option<u8>,
    ) -> Self {
        let (width, height) =
            Self::parse_dimensions(dims_segment).unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
        let format = Self::parse_format(format_segment);
        let quality = match quality {
            Some(q) if (1..=100).contains(&q) => q,
            _ => DEFAULT_QUALITY,
        };
        Self {
            width,
            height,
            format,
            quality,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_tail_segments() {
        let p = TransformParams::from_request(None, None, None);
        assert_eq!(p, TransformParams::default());
    }

    #[test]
    fn parses_valid_dimensions_and_format() {
        let p = TransformParams::from_request(Some("800x600"), Some("jpg"), Some(80));
        assert_eq!(p.width, 800);
        assert_eq!(p.height, 600);
        assert_eq!(p.format, ImageFormat::jpeg);
        assert_eq!(p.quality, 80);
    }

    #[test]
    fn invalid_dimensions_fall_back_to_defaults_gracefully() {
        let p = TransformParams::from_request(Some("invalid"), None, None);
        assert_eq!(p.width, DEFAULT_WIDTH);
        assert_eq!(p.height, DEFAULT_HEIGHT);
    }

    #[test]
    fn oversized_dimensions_fall_back_to_defaults() {
        let p = TransformParams::from_request(Some("9000x9000"), None, None);
        assert_eq!(p.width, DEFAULT_WIDTH);
        assert_eq!(p.height, DEFAULT_HEIGHT);
    }

    #[test]
    fn unknown_format_falls_back_to_webp() {
        let p = TransformParams::from_request(None, Some("bmp"), None);
        assert_eq!(p.format, ImageFormat::webp);
    }

    #[test]
    fn jpg_normalizes_to_jpeg() {
        let p = TransformParams::from_request(None, Some("jpg"), None);
        assert_eq!(p.format, ImageFormat::jpeg);
    }

    #[test]
    fn out_of_range_quality_falls_back_to_default() {
        let p = TransformParams::from_request(None, None, Some(150));
        assert_eq!(p.quality, DEFAULT_QUALITY);
    }

    #[test]
    fn malformed_quality_query_parses_to_none_instead_of_rejecting() {
        let q = ImageQuery {
            quality: Some("not-a-number".to_string()),
        };
        assert_eq!(q.parsed_quality(), None);
        let p = TransformParams::from_request(None, None, q.parsed_quality());
        assert_eq!(p.quality, DEFAULT_QUALITY);
    }

    #[test]
    fn equal_params_share_identical_encoding() {
        let a = TransformParams::from_request(Some("400x300"), Some("webp"), Some(90));
        let b = TransformParams::from_request(Some("400x300"), Some("webp"), Some(90));
        assert_eq!(a.normalized_encoding(), b.normalized_encoding());
    }
}
