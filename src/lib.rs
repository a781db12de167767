//! Plumage: an HTTP service that renders PlantUML markup to SVG/PNG by
//! supervising the PlantUML jar as a subprocess.

pub mod application;
pub mod config;
pub mod infra;
