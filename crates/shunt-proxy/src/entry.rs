//! Load and unload entry points.
//!
//! Unix images get a constructor only. Destructors run during process teardown,
//! after thread-local storage is gone, and the logging subscriber cannot run
//! there; the genuine images are never released, so there is nothing to undo.

#[cfg(windows)]
pub(crate) use self::windows::alloc_console;

#[cfg(windows)]
mod windows {
    use std::ffi::c_void;

    use windows_sys::Win32::Foundation::{BOOL, HINSTANCE, TRUE};
    use windows_sys::Win32::System::Console::AllocConsole;
    use windows_sys::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use crate::state::Proxy;

    #[no_mangle]
    pub unsafe extern "system" fn DllMain(
        _module: HINSTANCE,
        reason: u32,
        reserved: *mut c_void,
    ) -> BOOL {
        match reason {
            DLL_PROCESS_ATTACH => {
                Proxy::get().lifecycle().attach();
            }
            // A non-null `reserved` means the process is terminating: other
            // threads are gone and nothing may be logged.
            DLL_PROCESS_DETACH if reserved.is_null() => {
                if let Some(proxy) = Proxy::try_get() {
                    proxy.lifecycle().detach();
                }
            }
            _ => {}
        }
        TRUE
    }

    /// Give a console-less host a console for the banner and operator prompts.
    /// Fails harmlessly when one is already attached.
    pub(crate) fn alloc_console() {
        unsafe {
            AllocConsole();
        }
    }
}

/// Attach constructor for Linux. Runs when the loader maps the image.
#[cfg(target_os = "linux")]
#[link_section = ".init_array"]
#[used]
static ATTACH_LINUX: unsafe extern "C" fn() = {
    unsafe extern "C" fn attach() {
        crate::state::Proxy::get().lifecycle().attach();
    }
    attach
};

#[cfg(target_os = "macos")]
#[link_section = "__DATA,__mod_init_func"]
#[used]
static ATTACH_MACOS: unsafe extern "C" fn() = {
    unsafe extern "C" fn attach() {
        crate::state::Proxy::get().lifecycle().attach();
    }
    attach
};
