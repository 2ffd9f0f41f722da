//! Supervisor, control plane and self-updater for a single ComfyUI worker.

pub mod api;
pub mod archive;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod launcher;
pub mod listener;
pub mod logging;
pub mod monitor;
pub mod paths;
pub mod process;
pub mod restart;
pub mod update;
pub mod validation;

pub use error::{AppError, ErrorKind, Result};
pub use launcher::Launcher;
