use serde::Deserialize;

/// Formats the service advertises. Anything else is still handed to the
/// renderer, which picks the PNG backend and may fail on its own terms.
pub const SUPPORTED_FORMATS: &[&str] = &["svg", "png"];

/// Extensions probed, in order, when the expected output file is absent.
pub const FALLBACK_EXTENSIONS: &[&str] = &["svg", "png"];

/// Body of a `POST /render` request. Both fields are optional at the wire
/// level; the handler rejects a missing `code` with a 400.
#[derive(Debug, Deserialize)]
pub struct RenderPayload {
    pub code: Option<String>,
    pub format: Option<String>,
}

/// The requested output format, lower-cased and kept verbatim.
///
/// Unsupported values are not rejected here: the renderer receives the PNG
/// selector for them and the output resolver tolerates the extension
/// mismatch, mirroring how the renderer itself names files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat(String);

impl OutputFormat {
    pub const DEFAULT: &'static str = "svg";

    pub fn new(requested: Option<&str>) -> Self {
        Self(
            requested
                .unwrap_or(Self::DEFAULT)
                .trim()
                .to_ascii_lowercase(),
        )
    }

    /// The renderer's format selector flag: `-tsvg` for SVG, `-tpng` for
    /// everything else.
    pub fn flag(&self) -> &'static str {
        if self.0 == "svg" { "-tsvg" } else { "-tpng" }
    }

    /// The file extension the output is expected to carry.
    pub fn extension(&self) -> &str {
        &self.0
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_FORMATS.contains(&self.0.as_str())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(None)
    }
}

/// MIME type for a resolved output extension.
pub fn mime_for_extension(extension: &str) -> &'static str {
    if extension.eq_ignore_ascii_case("svg") {
        "image/svg+xml"
    } else {
        "image/png"
    }
}
