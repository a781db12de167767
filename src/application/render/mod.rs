//! The render pipeline: scratch workspace, renderer subprocess, output
//! resolution, and the per-request orchestration on top of them.

pub mod diagnostics;
pub mod invoker;
pub mod resolve;
pub mod service;
pub mod types;
pub mod workspace;

pub use diagnostics::DiagnosticsReport;
pub use invoker::{InvokeError, Invocation, PlantUmlInvoker};
pub use service::{RenderError, RenderService, RenderedImage, SampleReport};
pub use types::{OutputFormat, RenderPayload};
pub use workspace::Workspace;
