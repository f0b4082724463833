use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use super::{LoadError, ModuleImage};
use crate::SymbolAddress;

/// `dlopen` handle. Never closed: cached addresses point into the image.
pub struct NativeImage {
    handle: *mut libc::c_void,
    path: PathBuf,
}

// SAFETY: a dlopen handle is process-wide and dlsym is thread-safe.
unsafe impl Send for NativeImage {}
unsafe impl Sync for NativeImage {}

impl NativeImage {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let rejected = |reason: String| LoadError::Rejected {
            path: path.to_path_buf(),
            reason,
        };

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| rejected("path contains a NUL byte".to_string()))?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(rejected(last_dl_error()));
        }

        Ok(Self {
            handle,
            path: path.to_path_buf(),
        })
    }
}

impl ModuleImage for NativeImage {
    fn symbol(&self, name: &str) -> Option<SymbolAddress> {
        let c_name = CString::new(name).ok()?;
        let addr = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        SymbolAddress::from_ptr(addr)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

fn last_dl_error() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dlopen error".to_string()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}
