use std::path::{Path, PathBuf};

use super::types::FALLBACK_EXTENSIONS;

/// Locate the file the renderer actually produced.
///
/// The renderer's output extension does not always match the requested format
/// flag, so resolution is tolerant: the exact expected path wins, then each
/// alternative extension is probed in fixed preference order. `None` means
/// the render failed; the caller reports the workspace listing for diagnosis.
pub fn resolve_output(expected: &Path) -> Option<PathBuf> {
    if expected.exists() {
        return Some(expected.to_path_buf());
    }

    for extension in FALLBACK_EXTENSIONS {
        let candidate = expected.with_extension(extension);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}
