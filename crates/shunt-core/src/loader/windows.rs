use std::ffi::{CString, OsString};
use std::os::windows::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

use windows_sys::Win32::Foundation::{HMODULE, MAX_PATH};
use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows_sys::Win32::System::SystemInformation::GetSystemDirectoryW;

use super::{LoadError, ModuleImage};
use crate::SymbolAddress;

/// `LoadLibraryW` handle. Never freed: cached addresses point into the image.
pub struct NativeImage {
    handle: HMODULE,
    path: PathBuf,
}

// SAFETY: module handles are process-wide and GetProcAddress is thread-safe.
unsafe impl Send for NativeImage {}
unsafe impl Sync for NativeImage {}

impl NativeImage {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        let handle = unsafe { LoadLibraryW(wide.as_ptr()) };
        if handle == 0 {
            return Err(LoadError::Rejected {
                path: path.to_path_buf(),
                reason: std::io::Error::last_os_error().to_string(),
            });
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
        let proc = unsafe { GetProcAddress(self.handle, c_name.as_ptr() as *const u8) }?;
        SymbolAddress::new(proc as usize)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

pub(super) fn system_directory() -> Result<PathBuf, LoadError> {
    let mut buf = vec![0u16; MAX_PATH as usize + 1];
    loop {
        let len = unsafe { GetSystemDirectoryW(buf.as_mut_ptr(), buf.len() as u32) } as usize;
        if len == 0 {
            return Err(LoadError::NoSystemDirectory);
        }
        // A return larger than the buffer is the required size including the NUL.
        if len < buf.len() {
            buf.truncate(len);
            return Ok(PathBuf::from(OsString::from_wide(&buf)));
        }
        buf.resize(len, 0);
    }
}
