use serde::Serialize;

use super::{invoker::PlantUmlInvoker, workspace::Workspace};

/// Structured toolchain health report returned by `GET /test`.
#[derive(Debug, Serialize)]
pub struct DiagnosticsReport {
    pub status: &'static str,
    pub java_available: bool,
    pub java_version: String,
    pub plantuml_jar_exists: bool,
    pub plantuml_version: String,
    pub plantuml_jar_path: String,
    pub temp_directory: String,
    pub temp_writable: bool,
}

/// Probe the renderer toolchain. Individual probe failures are folded into
/// the report rather than propagated: the point of the endpoint is to say
/// what is broken. Nothing is mutated beyond the probe subprocesses and a
/// short-lived writability probe file.
pub async fn probe(invoker: &PlantUmlInvoker, workspace: &Workspace) -> DiagnosticsReport {
    let java = invoker.probe_java().await.ok();
    let java_available = java.as_ref().map(|run| run.success()).unwrap_or(false);
    // `java -version` reports on stderr.
    let java_version = if java_available {
        java.map(|run| run.stderr.trim().to_string())
            .unwrap_or_default()
    } else {
        "Not available".to_string()
    };

    let plantuml_jar_exists = invoker.jar_path().exists();
    let plantuml_version = if plantuml_jar_exists {
        match invoker.probe_renderer_version().await {
            Ok(run) if run.success() => run.stdout.trim().to_string(),
            _ => "Unknown".to_string(),
        }
    } else {
        "Unknown".to_string()
    };

    DiagnosticsReport {
        status: "ok",
        java_available,
        java_version,
        plantuml_jar_exists,
        plantuml_version,
        plantuml_jar_path: invoker.jar_path().display().to_string(),
        temp_directory: workspace.root().display().to_string(),
        temp_writable: workspace.probe_writable(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{RendererSettings, WorkspaceSettings};
    use std::num::NonZeroU32;
    use std::time::Duration;
    use std::{fs, os::unix::fs::PermissionsExt};
    use tempfile::TempDir;

    /// Fake Java that answers `-version` on stderr and the jar's `-version`
    /// on stdout, like the real toolchain.
    const VERSION_AWARE: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo 'openjdk version "21.0.2"' >&2
  exit 0
fi
for arg in "$@"; do
  if [ "$arg" = "-version" ]; then
    echo "PlantUML version 1.2024.3"
    exit 0
  fi
done
exit 1
"#;

    fn build_fixture(dir: &TempDir, script_body: &str, jar_exists: bool) -> (PlantUmlInvoker, Workspace) {
        let script = dir.path().join("fake-java");
        fs::write(&script, script_body).expect("write script");
        let mut perms = fs::metadata(&script).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).expect("set perms");

        let jar_path = dir.path().join("plantuml.jar");
        if jar_exists {
            fs::write(&jar_path, "jar bytes").expect("write jar");
        }

        let invoker = PlantUmlInvoker::new(&RendererSettings {
            java_path: script,
            jar_path,
            timeout: Duration::from_secs(5),
            max_concurrent: NonZeroU32::new(1).expect("nonzero"),
        });
        let workspace = Workspace::resolve(&WorkspaceSettings {
            directory: Some(dir.path().join("scratch")),
            sweep_on_start: false,
        })
        .expect("workspace");
        (invoker, workspace)
    }

    #[tokio::test]
    async fn healthy_toolchain_reports_all_green() {
        let dir = TempDir::new().expect("temp dir");
        let (invoker, workspace) = build_fixture(&dir, VERSION_AWARE, true);

        let report = probe(&invoker, &workspace).await;

        assert_eq!(report.status, "ok");
        assert!(report.java_available);
        assert!(report.java_version.contains("21.0.2"));
        assert!(report.plantuml_jar_exists);
        assert_eq!(report.plantuml_version, "PlantUML version 1.2024.3");
        assert!(report.temp_writable);
        // The writability probe must not leave files behind.
        assert!(workspace.listing().is_empty());
    }

    #[tokio::test]
    async fn missing_jar_is_reported_without_probing_its_version() {
        let dir = TempDir::new().expect("temp dir");
        let (invoker, workspace) = build_fixture(&dir, VERSION_AWARE, false);

        let report = probe(&invoker, &workspace).await;

        assert!(report.java_available);
        assert!(!report.plantuml_jar_exists);
        assert_eq!(report.plantuml_version, "Unknown");
    }

    #[tokio::test]
    async fn missing_runtime_is_reported_as_unavailable() {
        let dir = TempDir::new().expect("temp dir");
        let (_, workspace) = build_fixture(&dir, VERSION_AWARE, true);
        let invoker = PlantUmlInvoker::new(&RendererSettings {
            java_path: dir.path().join("no-such-java"),
            jar_path: dir.path().join("plantuml.jar"),
            timeout: Duration::from_secs(5),
            max_concurrent: NonZeroU32::new(1).expect("nonzero"),
        });

        let report = probe(&invoker, &workspace).await;

        assert!(!report.java_available);
        assert_eq!(report.java_version, "Not available");
    }
}
