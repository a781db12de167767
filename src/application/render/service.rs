use std::{io, num::NonZeroU32, path::Path, time::Instant};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::{
    invoker::{InvokeError, PlantUmlInvoker},
    resolve::resolve_output,
    types::{OutputFormat, mime_for_extension},
    workspace::Workspace,
};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Diagram rendered by `POST /test-simple` to prove the toolchain end to end.
const SAMPLE_DIAGRAM: &str = "@startuml\nA -> B: Hello\nB -> A: Hi\n@enduml";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("renderer is at capacity, try again later")]
    Busy,
    #[error("failed to write diagram source: {0}")]
    WriteInput(#[source] io::Error),
    #[error(transparent)]
    Invoke(#[from] InvokeError),
    #[error("failed to generate output file")]
    Unresolved {
        expected: String,
        temp_files: Vec<String>,
        stdout: String,
        stderr: String,
    },
    #[error("failed to read rendered output: {0}")]
    ReadOutput(#[source] io::Error),
}

/// A successfully rendered image ready to stream back.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    pub bytes: Bytes,
    pub mime: &'static str,
}

/// Raw invocation report returned by `POST /test-simple`.
#[derive(Debug, Serialize)]
pub struct SampleReport {
    pub success: bool,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Per-request orchestration: write the scratch input, run the renderer,
/// resolve its output, stream the bytes back, and clean up on every path.
pub struct RenderService {
    workspace: Workspace,
    invoker: PlantUmlInvoker,
    gate: Semaphore,
}

impl RenderService {
    pub fn new(workspace: Workspace, invoker: PlantUmlInvoker, max_concurrent: NonZeroU32) -> Self {
        Self {
            workspace,
            invoker,
            gate: Semaphore::new(max_concurrent.get() as usize),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn invoker(&self) -> &PlantUmlInvoker {
        &self.invoker
    }

    /// Render one diagram. When every gate permit is taken the caller gets
    /// [`RenderError::Busy`] immediately; requests are never queued.
    pub async fn render(
        &self,
        code: &str,
        format: &OutputFormat,
    ) -> Result<RenderedImage, RenderError> {
        let _permit = self.gate.try_acquire().map_err(|_| RenderError::Busy)?;
        let started_at = Instant::now();

        let scratch = self.workspace.scratch(format);
        let mut guard = scratch.guard();

        write_bom_prefixed(&scratch.input, code)
            .await
            .map_err(RenderError::WriteInput)?;

        let invocation = self.invoker.invoke(&scratch.input, format).await?;

        let Some(resolved) = resolve_output(&scratch.expected_output) else {
            let temp_files = self.workspace.listing();
            warn!(
                target = "application::render::service",
                op = "render",
                result = "unresolved",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                expected = %scratch.expected_output.display(),
                exit_code = invocation.return_code(),
                stderr = %invocation.stderr,
                "renderer produced no output file"
            );
            return Err(RenderError::Unresolved {
                expected: scratch.expected_output.display().to_string(),
                temp_files,
                stdout: invocation.stdout,
                stderr: invocation.stderr,
            });
        };
        guard.track(resolved.clone());

        let bytes = tokio::fs::read(&resolved)
            .await
            .map_err(RenderError::ReadOutput)?;
        let mime = mime_for_extension(
            resolved
                .extension()
                .and_then(|extension| extension.to_str())
                .unwrap_or(""),
        );

        info!(
            target = "application::render::service",
            op = "render",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            scratch_id = %scratch.id,
            mime = mime,
            image_bytes = bytes.len(),
            "diagram rendered"
        );

        Ok(RenderedImage {
            bytes: Bytes::from(bytes),
            mime,
        })
    }

    /// Render the fixed sample diagram and report the raw invocation outcome
    /// instead of streaming bytes. Scratch files are cleaned up the same way.
    pub async fn render_sample(&self) -> Result<SampleReport, RenderError> {
        let _permit = self.gate.try_acquire().map_err(|_| RenderError::Busy)?;

        let format = OutputFormat::default();
        let scratch = self.workspace.scratch(&format);
        let mut guard = scratch.guard();

        tokio::fs::write(&scratch.input, SAMPLE_DIAGRAM)
            .await
            .map_err(RenderError::WriteInput)?;

        let invocation = self.invoker.invoke(&scratch.input, &format).await?;

        let success = match resolve_output(&scratch.expected_output) {
            Some(resolved) => {
                guard.track(resolved);
                true
            }
            None => false,
        };

        Ok(SampleReport {
            success,
            return_code: invocation.return_code(),
            stdout: invocation.stdout,
            stderr: invocation.stderr,
        })
    }
}

/// Persist the diagram source as BOM-prefixed UTF-8 so the renderer's
/// encoding auto-detection reads non-ASCII text correctly.
async fn write_bom_prefixed(path: &Path, code: &str) -> io::Result<()> {
    let mut contents = Vec::with_capacity(UTF8_BOM.len() + code.len());
    contents.extend_from_slice(UTF8_BOM);
    contents.extend_from_slice(code.as_bytes());
    tokio::fs::write(path, contents).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{RendererSettings, WorkspaceSettings};
    use std::num::NonZeroU32;
    use std::time::Duration;
    use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};
    use tempfile::TempDir;

    /// Fake renderer that writes an output file adjacent to its input, the
    /// way the real jar does.
    const ADJACENT_WRITER: &str = r#"#!/bin/sh
for last; do :; done
input="$last"
fmt=png
for arg in "$@"; do
  [ "$arg" = "-tsvg" ] && fmt=svg
done
base="${input%.*}"
case "$fmt" in
  svg) printf '<svg xmlns="http://www.w3.org/2000/svg"></svg>' > "$base.svg" ;;
  *) printf '\211PNG\r\n\032\n' > "$base.png" ;;
esac
"#;

    fn install_script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-java");
        fs::write(&path, body).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    fn service_with(dir: &TempDir, script: PathBuf, max_concurrent: u32) -> RenderService {
        let workspace = Workspace::resolve(&WorkspaceSettings {
            directory: Some(dir.path().join("scratch")),
            sweep_on_start: false,
        })
        .expect("workspace");
        let invoker = PlantUmlInvoker::new(&RendererSettings {
            java_path: script,
            jar_path: PathBuf::from("/opt/plantuml.jar"),
            timeout: Duration::from_secs(5),
            max_concurrent: NonZeroU32::new(max_concurrent).expect("nonzero"),
        });
        RenderService::new(workspace, invoker, NonZeroU32::new(max_concurrent).expect("nonzero"))
    }

    #[tokio::test]
    async fn renders_svg_and_cleans_up() {
        let dir = TempDir::new().expect("temp dir");
        let script = install_script(&dir, ADJACENT_WRITER);
        let service = service_with(&dir, script, 2);

        let image = service
            .render("@startuml\nA -> B: hi\n@enduml", &OutputFormat::default())
            .await
            .expect("render");

        assert_eq!(image.mime, "image/svg+xml");
        assert!(
            image.bytes.starts_with(b"<svg"),
            "unexpected body: {:?}",
            image.bytes
        );
        assert!(
            service.workspace().listing().is_empty(),
            "scratch files must not outlive the request"
        );
    }

    #[tokio::test]
    async fn mismatched_extension_resolves_via_fallback() {
        let dir = TempDir::new().expect("temp dir");
        // Always writes SVG regardless of the requested format.
        let script = install_script(
            &dir,
            r#"#!/bin/sh
for last; do :; done
base="${last%.*}"
printf '<svg xmlns="http://www.w3.org/2000/svg"></svg>' > "$base.svg"
"#,
        );
        let service = service_with(&dir, script, 2);

        let image = service
            .render("@startuml\nA -> B: hi\n@enduml", &OutputFormat::new(Some("png")))
            .await
            .expect("fallback resolution");

        assert_eq!(image.mime, "image/svg+xml");
        assert!(service.workspace().listing().is_empty());
    }

    #[tokio::test]
    async fn missing_output_reports_diagnostics_and_cleans_up() {
        let dir = TempDir::new().expect("temp dir");
        let script = install_script(
            &dir,
            r#"#!/bin/sh
echo "no output today" >&2
echo "thinking"
exit 1
"#,
        );
        let service = service_with(&dir, script, 2);

        let err = service
            .render("@startuml\nbroken\n@enduml", &OutputFormat::default())
            .await
            .expect_err("no output file must classify as a render failure");

        match err {
            RenderError::Unresolved {
                expected,
                temp_files,
                stdout,
                stderr,
            } => {
                assert!(expected.ends_with(".svg"), "expected path: {expected}");
                assert!(stdout.contains("thinking"));
                assert!(stderr.contains("no output today"));
                // The listing was captured while the input file still existed.
                assert_eq!(temp_files.len(), 1, "listing: {temp_files:?}");
            }
            other => panic!("unexpected error variant: {other:?}"),
        }
        assert!(service.workspace().listing().is_empty());
    }

    #[tokio::test]
    async fn saturated_gate_rejects_instead_of_queuing() {
        let dir = TempDir::new().expect("temp dir");
        let script = install_script(
            &dir,
            r#"#!/bin/sh
sleep 1
for last; do :; done
base="${last%.*}"
printf '<svg xmlns="http://www.w3.org/2000/svg"></svg>' > "$base.svg"
"#,
        );
        let service = service_with(&dir, script, 1);

        let slow_format = OutputFormat::default();
        let slow = service.render("@startuml\nA -> B: hi\n@enduml", &slow_format);
        let quick = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            service
                .render("@startuml\nA -> B: hi\n@enduml", &OutputFormat::default())
                .await
        };

        let (slow_result, quick_result) = tokio::join!(slow, quick);
        assert!(slow_result.is_ok(), "first request should render");
        assert!(
            matches!(quick_result, Err(RenderError::Busy)),
            "second request should be rejected while the gate is held"
        );
    }

    #[tokio::test]
    async fn sample_render_reports_invocation_outcome() {
        let dir = TempDir::new().expect("temp dir");
        let script = install_script(&dir, ADJACENT_WRITER);
        let service = service_with(&dir, script, 2);

        let report = service.render_sample().await.expect("sample report");

        assert!(report.success);
        assert_eq!(report.return_code, 0);
        assert!(service.workspace().listing().is_empty());
    }
}
