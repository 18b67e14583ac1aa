//! Data structures shared across the kernel.

pub mod kind;
pub mod manifest;
pub mod status;

pub use kind::ModuleKind;
pub use manifest::{Manifest, ModuleDescriptor, PackageDescriptor};
pub use status::EntryStatus;
