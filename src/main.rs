use std::{process, sync::Arc};

use plumage::{
    application::{
        error::AppError,
        render::{PlantUmlInvoker, RenderService, Workspace},
    },
    config,
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (_cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    let workspace = Workspace::resolve(&settings.workspace)?;
    if settings.workspace.sweep_on_start {
        let removed = workspace.sweep_stale();
        if removed > 0 {
            info!(
                target = "plumage::startup",
                removed,
                directory = %workspace.root().display(),
                "swept stale scratch files"
            );
        }
    }

    info!(
        target = "plumage::startup",
        jar_path = %settings.renderer.jar_path.display(),
        jar_present = settings.renderer.jar_path.exists(),
        workspace = %workspace.root().display(),
        max_concurrent = settings.renderer.max_concurrent.get(),
        timeout_secs = settings.renderer.timeout.as_secs(),
        "renderer configured"
    );

    let invoker = PlantUmlInvoker::new(&settings.renderer);
    let render = Arc::new(RenderService::new(
        workspace,
        invoker,
        settings.renderer.max_concurrent,
    ));

    let state = HttpState {
        render,
        verbose_errors: settings.http.verbose_errors,
    };
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::from)?;
    info!(
        target = "plumage::startup",
        addr = %settings.server.addr,
        "listening"
    );

    axum::serve(listener, router)
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
