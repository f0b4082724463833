//! C-ABI dispatch surface.
//!
//! `get_fptr` is what generated export stubs call: they pass the genuine library
//! and the export name, then jump to whatever comes back. The result is never null.

use std::ffi::{c_char, c_void, CStr};

use shunt_config::{log_resolve_error, log_stub_error};

use crate::state::Proxy;

/// Address of `name` in the genuine `lib_name`, or of the unresolved-call stub.
///
/// A null or non-UTF-8 argument also yields the stub.
#[no_mangle]
pub unsafe extern "system" fn get_fptr(lib_name: *const c_char, name: *const c_char) -> *const c_void {
    let resolver = Proxy::get().resolver();
    match (c_str(lib_name), c_str(name)) {
        (Some(lib), Some(sym)) => resolver.resolve_or_stub(lib, sym).as_ptr(),
        _ => {
            log_resolve_error!("get_fptr called with a null or non-UTF-8 name");
            resolver.stub_address().as_ptr()
        }
    }
}

unsafe fn c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Target of every unresolved forward. Takes no arguments and never returns.
pub extern "C" fn unresolved_stub() -> ! {
    let proxy = Proxy::get();
    let miss = proxy.resolver().last_miss();
    proxy
        .stub()
        .halt(miss.as_ref().map(|(lib, sym)| (lib.as_str(), sym.as_str())))
}

/// Start a debugger against this process and break once it is attached.
///
/// Exported for extensions and for manual use from a host's own debug hooks.
#[no_mangle]
pub extern "system" fn launch_debugger() -> bool {
    match Proxy::get().stub().launch_debugger() {
        Ok(()) => true,
        Err(err) => {
            log_stub_error!(
                "debugger launch failed",
                error = tracing::field::display(&err),
            );
            false
        }
    }
}
