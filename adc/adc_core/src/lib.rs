//! # ADC Core
//!
//! `adc_core` provides the building blocks shared by every part of the ADC
//! module kernel: the error taxonomy, identifiers, the capability symbol
//! table, the declarative manifest model and the contracts that every
//! loadable module implements.
//!
//! ## Module kinds
//!
//! The kernel composes six kinds of pluggable units:
//!
//! 1. **Providers** supply infrastructure (HTTP servers, queues, storage).
//! 2. **Utilities** supply stateless helpers (adapters, codecs).
//! 3. **Services** carry business logic on top of providers and utilities.
//! 4. **Middlewares** wrap request handling.
//! 5. **Presets** bundle other modules into a reusable capability set.
//! 6. **Apps** are entry points; the kernel calls `run` on them instead of
//!    handing out an instance.
//!
//! ## Crate Structure
//!
//! - **error**: Error types and the kernel error taxonomy
//! - **id**: Strongly-typed identifiers for loaded instances
//! - **symbol**: Process-wide capability interning
//! - **traits**: Lifecycle and module contracts
//! - **types**: Module kinds, statuses, manifests and package descriptors
//! - **utils**: Versions, version requirements and log levels

pub mod error;
pub mod id;
pub mod symbol;
pub mod traits;
pub mod types;
pub mod utils;

pub use error::{Error, ErrorKind, Result};
pub use id::InstanceId;
pub use symbol::{CapabilityId, SymbolTable};
pub use traits::{App, Component, Instance, Lifecycle, LifecycleToken, ModuleHandle, TokenSource};
pub use types::{EntryStatus, Manifest, ModuleDescriptor, ModuleKind, PackageDescriptor};
pub use utils::{LogLevel, Version, VersionReq};
