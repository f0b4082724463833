//! Companion extension: start an auxiliary library's entry point on the worker thread.
//!
//! The companion lives next to the host executable, not in the system directory,
//! and exports `int entry(int argc, const char **argv)`. Typical use is bootstrapping
//! a managed runtime that installs its own hooks while the host starts up.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libc::{c_char, c_int};
use shunt_config::{log_attach_info, log_attach_warn, CompanionConfig};

use crate::lifecycle::{AttachContext, AttachExtension, ExtensionError};
use crate::loader::{LoadError, ModuleImage, NativeImage};
use crate::SymbolAddress;

type CompanionEntry = unsafe extern "C" fn(argc: c_int, argv: *const *const c_char) -> c_int;

type Opener = dyn Fn(&Path) -> Result<Box<dyn ModuleImage>, LoadError> + Send + Sync;

pub struct CompanionExtension {
    library: PathBuf,
    entry: String,
    args: Vec<String>,
    thread_name: String,
    opener: Arc<Opener>,
}

impl CompanionExtension {
    /// `None` when no companion library is configured. Relative paths resolve
    /// against `base_dir` (the host executable's directory).
    pub fn from_config(config: &CompanionConfig, base_dir: &Path) -> Option<Self> {
        let library = config.library.as_ref()?;
        let library = if library.is_absolute() {
            library.clone()
        } else {
            base_dir.join(library)
        };
        Some(Self {
            library,
            entry: config.entry.clone(),
            args: config.args.clone(),
            thread_name: config.thread_name.clone(),
            opener: Arc::new(|path: &Path| {
                NativeImage::open(path).map(|image| Box::new(image) as Box<dyn ModuleImage>)
            }),
        })
    }

    /// Replace how the companion image is opened.
    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&Path) -> Result<Box<dyn ModuleImage>, LoadError> + Send + Sync + 'static,
    {
        self.opener = Arc::new(opener);
        self
    }

    pub fn library(&self) -> &Path {
        &self.library
    }

    /// argv as seen by the entry point: the thread name, then the configured args.
    fn argv(&self) -> Result<Vec<CString>, ExtensionError> {
        std::iter::once(self.thread_name.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|arg| {
                CString::new(arg)
                    .map_err(|_| ExtensionError::Other(format!("argument {arg:?} contains NUL")))
            })
            .collect()
    }
}

impl AttachExtension for CompanionExtension {
    fn name(&self) -> &str {
        "companion"
    }

    /// Only spawns the worker. Opening the image and resolving the entry happen
    /// on that thread: attach may run under the OS loader lock, where loading
    /// another library can deadlock.
    fn on_attach(&self, ctx: &AttachContext<'_>) -> Result<(), ExtensionError> {
        let argv = self.argv()?;
        let opener = Arc::clone(&self.opener);
        let library = self.library.clone();
        let entry_name = self.entry.clone();

        log_attach_info!(
            "starting companion",
            library = tracing::field::display(library.display()),
            entry = entry_name.as_str(),
        );

        ctx.spawn_worker(&self.thread_name, move || {
            let image = match (*opener)(&library) {
                Ok(image) => image,
                Err(err) => {
                    log_attach_warn!(
                        "companion could not be loaded",
                        library = tracing::field::display(library.display()),
                        error = tracing::field::display(&err),
                    );
                    return;
                }
            };
            let Some(entry) = image.symbol(&entry_name) else {
                log_attach_warn!(
                    "companion does not export its entry",
                    library = tracing::field::display(library.display()),
                    entry = entry_name.as_str(),
                );
                return;
            };

            let code = unsafe { call_entry(entry, &argv) };
            if code != 0 {
                log_attach_warn!("companion entry returned non-zero", code = code as i64);
            }
        })
    }
}

/// # Safety
/// `entry` must be an exported `int(int, const char **)` function.
unsafe fn call_entry(entry: SymbolAddress, argv: &[CString]) -> c_int {
    let ptrs: Vec<*const c_char> = argv
        .iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    let entry: CompanionEntry = std::mem::transmute::<usize, CompanionEntry>(entry.get());
    entry(argv.len() as c_int, ptrs.as_ptr())
}
