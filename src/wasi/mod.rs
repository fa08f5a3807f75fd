//! The WASI preview-1 system-call surface.
//!
//! ## Authors
//!
//! The WASI Sandbox Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE_MIT.markdown` file in the WASI Sandbox root directory for
//! information on licensing and copyright.

pub mod common;
pub mod strace;

pub use common::{Bindings, FatalError, WasiApiName};
