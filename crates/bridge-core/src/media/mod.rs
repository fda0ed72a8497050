//! Media codec helpers (§4.2): MIME/kind inference from file extension, the
//! Ogg/Opus page walker, and the STT subprocess shim.

mod ogg;
mod transcribe;

pub use ogg::analyze as analyze_ogg_opus;
pub use transcribe::transcribe;

use crate::store::MediaKind;

/// Infer (kind, mime type) from a file path's extension (§6.5). Anything
/// unrecognized is treated as a generic document.
pub fn infer(path: &str) -> (MediaKind, &'static str) {
    let ext = std::path::Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "jpg" | "jpeg" => (MediaKind::Image, "image/jpeg"),
        "png" => (MediaKind::Image, "image/png"),
        "gif" => (MediaKind::Image, "image/gif"),
        "webp" => (MediaKind::Image, "image/webp"),
        "ogg" => (MediaKind::Audio, "audio/ogg; codecs=opus"),
        "mp4" => (MediaKind::Video, "video/mp4"),
        "avi" => (MediaKind::Video, "video/avi"),
        "mov" => (MediaKind::Video, "video/quicktime"),
        _ => (MediaKind::Document, "application/octet-stream"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_known_extensions() {
        assert_eq!(infer("photo.JPG").0, MediaKind::Image);
        assert_eq!(infer("clip.mp4").1, "video/mp4");
        assert_eq!(infer("voice.ogg").1, "audio/ogg; codecs=opus");
    }

    #[test]
    fn unknown_extension_is_document() {
        let (kind, mime) = infer("report.xyz");
        assert_eq!(kind, MediaKind::Document);
        assert_eq!(mime, "application/octet-stream");
    }

    #[test]
    fn no_extension_is_document() {
        assert_eq!(infer("noext").0, MediaKind::Document);
    }
}
