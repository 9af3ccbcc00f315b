pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() && !name[1..].contains('.') {
        // ".env" has no extension, it is a hidden file name
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn content_type_for_path(path: &str) -> &'static str {
    let Some(ext) = extension_of(path) else {
        return DEFAULT_CONTENT_TYPE;
    };

    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "txt" => "text/plain; charset=utf-8",
        "md" => "text/markdown; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions() {
        assert_eq!(content_type_for_path("index.html"), "text/html; charset=utf-8");
        assert_eq!(content_type_for_path("img/Logo.PNG"), "image/png");
        assert_eq!(content_type_for_path("app.wasm"), "application/wasm");
    }

    #[test]
    fn unknown_or_missing_extension_falls_back() {
        assert_eq!(content_type_for_path("LICENSE"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for_path("data.bin"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for_path(".env"), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn extension_of_handles_dirs_and_dotfiles() {
        assert_eq!(extension_of("a.b/c"), None);
        assert_eq!(extension_of(".env"), None);
        assert_eq!(extension_of(".config.json").as_deref(), Some("json"));
        assert_eq!(extension_of("x/archive.tar.GZ").as_deref(), Some("gz"));
    }
}
