//! # shunt-proxy
//!
//! Drop-in replacement for a system library. The host loads this image under the
//! genuine library's name; every export is forwarded to the genuine copy in the
//! system directory through [`dispatch::get_fptr`].
//!
//! On Windows the crate builds as a `version.dll` stand-in with typed forwards for
//! the whole public API (see `forwards`). Externally generated assembly stubs can
//! instead call `get_fptr(library, symbol)` and jump to the returned address.
//!
//! # Attach
//!
//! - Windows: `DllMain(DLL_PROCESS_ATTACH)`
//! - Linux: `.init_array` constructor
//! - macOS: `__mod_init_func` constructor
//!
//! All of them build the process-wide [`state::Proxy`] and run its attach sequence.

// Allow unsafe FFI functions without safety docs - these are inherently unsafe C ABI
#![allow(clippy::missing_safety_doc)]

// Macros must be defined before modules that use them
#[macro_use]
mod macros;

pub mod dispatch;
mod entry;
#[cfg(windows)]
mod forwards;
pub mod state;

pub use dispatch::{get_fptr, launch_debugger};
