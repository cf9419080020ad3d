//! Extension → MIME type lookup for stored objects.

const FALLBACK: &str = "application/octet-stream";

pub fn for_path(path: &str) -> &'static str {
    let Some((_, ext)) = path.rsplit_once('.') else {
        return FALLBACK;
    };
    if ext.contains('/') {
        return FALLBACK;
    }
    match ext.to_ascii_lowercase().as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        _ => FALLBACK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(for_path("index.html"), "text/html; charset=utf-8");
        assert_eq!(for_path("a/b/app.JS"), "application/javascript");
        assert_eq!(for_path("logo.svg"), "image/svg+xml");
    }

    #[test]
    fn test_unknown_or_missing_extension() {
        assert_eq!(for_path("LICENSE"), FALLBACK);
        assert_eq!(for_path("dir.d/README"), FALLBACK);
        assert_eq!(for_path("data.bin"), FALLBACK);
    }
}
