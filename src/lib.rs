//! Control-plane core for an addressable-LED controller
//!
//! Composes physical devices into virtual strips, routes engine frames to
//! preview renderers, and reconciles effect settings, presets and scenes with
//! a remote rendering engine reached through [`engine::EngineCommands`].

pub mod bridge;
pub mod cli;
pub mod codec;
pub mod config;
pub mod controller;
pub mod debounce;
pub mod effects;
pub mod engine;
pub mod error;
pub mod frames;
pub mod paths;
pub mod prefs;
pub mod scenes;
pub mod settings_io;
pub mod store;
pub mod types;

pub use controller::{Controller, CoreOptions};
pub use error::{CommandError, ControlError, ValidationError};
