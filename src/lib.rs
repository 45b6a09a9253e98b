//! A host runtime that dispatches plugin commands inside disposable
//! sandboxes.
//!
//! Each invocation gets its own console capture, exit interception and
//! scope; leaked channels and mounts are released and the working
//! directory is restored before the normalized [`Outcome`] is returned.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod plugins;
pub mod sandbox;

pub use dispatch::{Dispatcher, Invocation, Outcome};
pub use error::{CommandFailure, DispatchError, RegistryError, ScriptError};
pub use host::Host;
pub use plugins::{CommandRegistry, Plugin};
pub use sandbox::Sandbox;
