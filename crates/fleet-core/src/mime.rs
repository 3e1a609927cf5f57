use std::path::Path;

pub const DEFAULT_MIME: &str = "application/octet-stream";
pub const GZIP_MIME: &str = "application/x-gzip";

/// Mime type recorded for an uploaded file, inferred from its extension.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "log" | "txt" | "html" | "htm" => "text/plain",
        "png" => "image/png",
        "jpg" => "image/jpeg",
        "bmp" => "image/bmp",
        "tar" => "application/x-tar",
        "bz" => "application/x-bzip",
        "bz2" => "application/x-bzip2",
        "zip" => "application/zip",
        "gz" => GZIP_MIME,
        _ => DEFAULT_MIME,
    }
}

/// Content that gains nothing from another gzip pass.
pub fn is_precompressed(mime: &str) -> bool {
    matches!(
        mime,
        "application/x-bzip" | "application/x-bzip2" | "application/zip" | GZIP_MIME
    )
}
