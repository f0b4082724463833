//! # shunt-core
//!
//! Proxy resolution and dispatch core for a drop-in library shim.
//!
//! The shim is loaded by the host in place of a system library. Every call it does not
//! override is routed through [`ResolutionCache::resolve`], which lazily loads the
//! genuine copy from the system directory and memoises symbol addresses. A failed
//! lookup never yields null: the caller gets the stub address instead, and the stub
//! halts under operator control when invoked.
//!
//! Raw pointers only appear in [`loader`]'s platform modules and in the companion
//! entry call; everything else operates on [`SymbolAddress`] values.

pub mod cache;
pub mod companion;
pub mod lifecycle;
pub mod loader;
pub mod stub;

pub use cache::{CacheStats, ResolutionCache, Resolution};
pub use companion::CompanionExtension;
pub use lifecycle::{
    AttachContext, AttachExtension, ExtensionError, HookTable, InterceptError,
    InterceptionInstaller, Lifecycle, NoopExtension,
};
pub use loader::{ImageLoader, LibraryName, LoadError, ModuleImage, NativeImage, SystemLoader};
pub use stub::{OperatorPrompt, StdinPrompt, StubHandler};

use std::fmt;
use std::num::NonZeroUsize;

/// A callable address inside a loaded image. Never null by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddress(NonZeroUsize);

impl SymbolAddress {
    pub fn new(addr: usize) -> Option<Self> {
        NonZeroUsize::new(addr).map(Self)
    }

    pub fn from_ptr(ptr: *const libc::c_void) -> Option<Self> {
        Self::new(ptr as usize)
    }

    /// Address of a diverging `extern "C"` handler such as the unresolved-call stub.
    pub fn of_stub(f: extern "C" fn() -> !) -> Self {
        // SAFETY: function pointers are never null.
        Self(unsafe { NonZeroUsize::new_unchecked(f as usize) })
    }

    pub fn get(self) -> usize {
        self.0.get()
    }

    pub fn as_ptr(self) -> *const libc::c_void {
        self.0.get() as *const libc::c_void
    }
}

impl fmt::Display for SymbolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_address_rejects_null() {
        assert!(SymbolAddress::new(0).is_none());
        assert!(SymbolAddress::from_ptr(std::ptr::null()).is_none());
        assert_eq!(SymbolAddress::new(0x1000).unwrap().get(), 0x1000);
    }

    #[test]
    fn test_symbol_address_display() {
        assert_eq!(SymbolAddress::new(0xdead).unwrap().to_string(), "0xdead");
    }
}
