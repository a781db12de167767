use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::{process::Command, time};
use tracing::{info, warn};

use crate::config::RendererSettings;

use super::types::OutputFormat;

/// Forces the JVM's default encoding so non-ASCII diagram text round-trips
/// through the renderer's own file reading.
const JAVA_ENCODING_PROPERTY: &str = "-Dfile.encoding=UTF-8";
const JAVA_TOOL_OPTIONS_VAR: &str = "JAVA_TOOL_OPTIONS";
const RENDERER_CHARSET: &str = "UTF-8";

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("renderer runtime unavailable: {0}")]
    NotFound(#[source] io::Error),
    #[error("failed to run renderer subprocess: {0}")]
    Io(#[source] io::Error),
    #[error("renderer timed out after {} seconds", .timeout.as_secs())]
    Timeout { timeout: Duration },
}

/// Captured result of one renderer subprocess run.
///
/// The renderer is known to exit nonzero while still producing valid output,
/// so the exit code is informational; output-file existence is the success
/// signal the callers act on.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl Invocation {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code flattened for wire reports; signal-terminated children map
    /// to -1.
    pub fn return_code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }
}

/// Spawns the PlantUML jar through the configured Java runtime.
#[derive(Debug, Clone)]
pub struct PlantUmlInvoker {
    java_path: PathBuf,
    jar_path: PathBuf,
    timeout: Duration,
}

impl PlantUmlInvoker {
    pub fn new(settings: &RendererSettings) -> Self {
        Self {
            java_path: settings.java_path.clone(),
            jar_path: settings.jar_path.clone(),
            timeout: settings.timeout,
        }
    }

    pub fn java_path(&self) -> &Path {
        &self.java_path
    }

    pub fn jar_path(&self) -> &Path {
        &self.jar_path
    }

    /// Render the given input file. The renderer writes its output adjacent
    /// to the input, named by replacing the input extension with the format's
    /// extension; this call only reports what the subprocess said.
    pub async fn invoke(
        &self,
        input: &Path,
        format: &OutputFormat,
    ) -> Result<Invocation, InvokeError> {
        let started_at = Instant::now();

        let mut command = Command::new(&self.java_path);
        command
            .arg(JAVA_ENCODING_PROPERTY)
            .arg("-jar")
            .arg(&self.jar_path)
            .arg(format.flag())
            .arg("-charset")
            .arg(RENDERER_CHARSET)
            .arg(input)
            .env(JAVA_TOOL_OPTIONS_VAR, JAVA_ENCODING_PROPERTY);

        let invocation = self.capture(command, "plantuml::invoke").await?;

        info!(
            target = "application::render::invoker",
            op = "plantuml::invoke",
            exit_code = invocation.return_code(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            input = %input.display(),
            format = format.extension(),
            "renderer subprocess finished"
        );

        Ok(invocation)
    }

    /// Probe whether the Java runtime itself is invocable (`java -version`).
    pub async fn probe_java(&self) -> Result<Invocation, InvokeError> {
        let mut command = Command::new(&self.java_path);
        command.arg("-version");
        self.capture(command, "plantuml::probe_java").await
    }

    /// Ask the renderer artifact for its self-reported version string.
    pub async fn probe_renderer_version(&self) -> Result<Invocation, InvokeError> {
        let mut command = Command::new(&self.java_path);
        command.arg("-jar").arg(&self.jar_path).arg("-version");
        self.capture(command, "plantuml::probe_version").await
    }

    /// Run a prepared command under the configured deadline, capturing all
    /// streams. On expiry the child is killed (`kill_on_drop`) and the run is
    /// classified as a timeout.
    async fn capture(
        &self,
        mut command: Command,
        op: &'static str,
    ) -> Result<Invocation, InvokeError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(
                    target = "application::render::invoker",
                    op = op,
                    error_code = "spawn",
                    error = %err,
                    "failed to spawn renderer subprocess"
                );
                return Err(if err.kind() == ErrorKind::NotFound {
                    InvokeError::NotFound(err)
                } else {
                    InvokeError::Io(err)
                });
            }
            Err(_) => {
                warn!(
                    target = "application::render::invoker",
                    op = op,
                    error_code = "timeout",
                    timeout_secs = self.timeout.as_secs(),
                    "renderer subprocess exceeded its deadline"
                );
                return Err(InvokeError::Timeout {
                    timeout: self.timeout,
                });
            }
        };

        Ok(Invocation {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::num::NonZeroU32;
    use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};
    use tempfile::TempDir;

    fn make_executable(path: &PathBuf) {
        let mut perms = fs::metadata(path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).expect("set perms");
    }

    fn invoker_with(java_path: PathBuf, timeout: Duration) -> PlantUmlInvoker {
        PlantUmlInvoker::new(&RendererSettings {
            java_path,
            jar_path: PathBuf::from("/opt/plantuml.jar"),
            timeout,
            max_concurrent: NonZeroU32::new(1).expect("nonzero"),
        })
    }

    #[tokio::test]
    async fn nonzero_exit_is_captured_not_failed() {
        let dir = TempDir::new().expect("temp dir");
        let script_path = dir.path().join("fake-java");
        fs::write(
            &script_path,
            r#"#!/bin/sh
echo "some warning" >&2
echo "processed"
exit 3
"#,
        )
        .expect("write script");
        make_executable(&script_path);

        let invoker = invoker_with(script_path, Duration::from_secs(5));
        let input = dir.path().join("plantuml_test.puml");
        fs::write(&input, "@startuml\n@enduml").expect("write input");

        let invocation = invoker
            .invoke(&input, &OutputFormat::default())
            .await
            .expect("nonzero exit must still yield a captured invocation");

        assert_eq!(invocation.exit_code, Some(3));
        assert_eq!(invocation.return_code(), 3);
        assert!(!invocation.success());
        assert!(invocation.stdout.contains("processed"));
        assert!(invocation.stderr.contains("some warning"));
    }

    #[tokio::test]
    async fn encoding_and_format_flags_are_passed() {
        let dir = TempDir::new().expect("temp dir");
        let script_path = dir.path().join("fake-java");
        let args_path = dir.path().join("args.log");
        let script = format!(
            r#"#!/bin/sh
echo "$@" > "{args_file}"
echo "$JAVA_TOOL_OPTIONS" >> "{args_file}"
"#,
            args_file = args_path.display()
        );
        fs::write(&script_path, script).expect("write script");
        make_executable(&script_path);

        let invoker = invoker_with(script_path, Duration::from_secs(5));
        let input = dir.path().join("plantuml_test.puml");
        fs::write(&input, "@startuml\n@enduml").expect("write input");

        invoker
            .invoke(&input, &OutputFormat::new(Some("png")))
            .await
            .expect("invocation");

        let args = fs::read_to_string(&args_path).expect("read args");
        assert!(args.contains("-Dfile.encoding=UTF-8"), "args: {args}");
        assert!(args.contains("-jar /opt/plantuml.jar"), "args: {args}");
        assert!(args.contains("-tpng"), "args: {args}");
        assert!(args.contains("-charset UTF-8"), "args: {args}");
        assert!(
            args.lines().nth(1) == Some("-Dfile.encoding=UTF-8"),
            "JAVA_TOOL_OPTIONS not exported: {args}"
        );
    }

    #[tokio::test]
    async fn missing_runtime_is_classified() {
        let dir = TempDir::new().expect("temp dir");
        let invoker = invoker_with(dir.path().join("no-such-java"), Duration::from_secs(5));
        let input = dir.path().join("plantuml_test.puml");
        fs::write(&input, "@startuml\n@enduml").expect("write input");

        let err = invoker
            .invoke(&input, &OutputFormat::default())
            .await
            .expect_err("missing runtime must fail");
        assert!(matches!(err, InvokeError::NotFound(_)));
    }

    #[tokio::test]
    async fn hung_renderer_is_killed_at_the_deadline() {
        let dir = TempDir::new().expect("temp dir");
        let script_path = dir.path().join("fake-java");
        fs::write(
            &script_path,
            r#"#!/bin/sh
sleep 30
"#,
        )
        .expect("write script");
        make_executable(&script_path);

        let invoker = invoker_with(script_path, Duration::from_millis(200));
        let input = dir.path().join("plantuml_test.puml");
        fs::write(&input, "@startuml\n@enduml").expect("write input");

        let started = Instant::now();
        let err = invoker
            .invoke(&input, &OutputFormat::default())
            .await
            .expect_err("hung renderer must time out");

        assert!(matches!(err, InvokeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
