// src/upload/sniff.rs
//! Content-type sniffing from leading bytes. Declared types from remote
//! servers are often wrong (`application/octet-stream`, `text/html` for
//! images); the signature wins when it is recognised.

pub const PNG: &str = "image/png";
pub const JPEG: &str = "image/jpeg";
pub const WEBP: &str = "image/webp";
pub const GIF: &str = "image/gif";

/// Fallback when neither the payload nor the caller tells us anything useful.
pub const DEFAULT_IMAGE_TYPE: &str = JPEG;

pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        return Some(PNG);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(JPEG);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(WEBP);
    }
    if bytes.starts_with(b"GIF8") {
        return Some(GIF);
    }
    None
}

/// Sniffed type, else the declared one (parameters stripped), else JPEG.
pub fn resolve_content_type(bytes: &[u8], declared: Option<&str>) -> String {
    if let Some(t) = sniff_content_type(bytes) {
        return t.to_string();
    }
    declared
        .map(|d| d.split(';').next().unwrap_or(d).trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| DEFAULT_IMAGE_TYPE.to_string())
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        PNG => "png",
        WEBP => "webp",
        GIF => "gif",
        "image/svg+xml" => "svg",
        JPEG | "image/jpg" => "jpg",
        _ => "bin",
    }
}
