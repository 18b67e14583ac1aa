//! Traits implemented by loadable modules.

pub mod module;

pub use module::{App, Component, Instance, Lifecycle, LifecycleToken, ModuleHandle, TokenSource};
