//! Genuine library loader.
//!
//! The proxy and the library it stands in for share a file name, so a plain
//! search-path load would find the proxy again. The loader therefore builds an
//! absolute path inside the OS system directory and loads exactly that file.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::NativeImage;
#[cfg(windows)]
pub use windows::NativeImage;

use std::fmt;
use std::path::{Path, PathBuf};

use shunt_config::{log_loader_debug, LoaderConfig};
use thiserror::Error;

use crate::SymbolAddress;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("invalid library name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("system directory could not be determined")]
    NoSystemDirectory,

    #[error("failed to load {}: {reason}", path.display())]
    Rejected { path: PathBuf, reason: String },
}

/// Bare library name: no directory, no extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryName(String);

impl LibraryName {
    /// Validate a bare name. Anything that could steer the constructed path out of
    /// the system directory is rejected before the filesystem is touched.
    pub fn new(name: &str) -> Result<Self, LoadError> {
        let reject = |reason| {
            Err(LoadError::InvalidName {
                name: name.to_string(),
                reason,
            })
        };

        if name.is_empty() {
            return reject("empty name");
        }
        if name.contains(|c| c == '/' || c == '\\') {
            return reject("contains a path separator");
        }
        if name.contains('.') {
            return reject("contains an extension or relative component");
        }
        if name.contains(':') {
            return reject("contains a drive or stream separator");
        }
        if name.contains('\0') {
            return reject("contains a NUL byte");
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Platform file name of the genuine library.
    pub fn file_name(&self) -> String {
        if cfg!(windows) {
            format!("{}.dll", self.0)
        } else if cfg!(target_os = "macos") {
            format!("lib{}.dylib", self.0)
        } else {
            format!("lib{}.so", self.0)
        }
    }
}

impl fmt::Display for LibraryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A loaded image that can be queried for exports.
pub trait ModuleImage: Send + Sync {
    /// Look up an exported symbol. `None` when the image does not export it.
    fn symbol(&self, name: &str) -> Option<SymbolAddress>;

    /// Path the image was loaded from
    fn path(&self) -> &Path;
}

/// Source of genuine images. [`SystemLoader`] in production, scripted in tests.
pub trait ImageLoader: Send + Sync {
    fn load(&self, name: &LibraryName) -> Result<Box<dyn ModuleImage>, LoadError>;
}

/// Loads genuine libraries from the OS system directory.
#[derive(Debug, Clone, Default)]
pub struct SystemLoader {
    system_dir: Option<PathBuf>,
}

impl SystemLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self {
            system_dir: config.system_dir.clone(),
        }
    }

    /// Replace the OS-reported directory (tests and unusual installs).
    pub fn with_system_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            system_dir: Some(dir.into()),
        }
    }

    pub fn system_dir(&self) -> Result<PathBuf, LoadError> {
        match &self.system_dir {
            Some(dir) => Ok(dir.clone()),
            None => system_directory(),
        }
    }

    /// Absolute path of the genuine copy of `name`.
    pub fn library_path(&self, name: &LibraryName) -> Result<PathBuf, LoadError> {
        Ok(self.system_dir()?.join(name.file_name()))
    }
}

impl ImageLoader for SystemLoader {
    fn load(&self, name: &LibraryName) -> Result<Box<dyn ModuleImage>, LoadError> {
        let path = self.library_path(name)?;
        log_loader_debug!("opening genuine image", path = tracing::field::display(path.display()));
        let err = match NativeImage::open(&path) {
            Ok(image) => return Ok(Box::new(image)),
            Err(err) => err,
        };

        // `lib<name>.so` is usually a dev symlink or a linker script; the runtime
        // copy carries the soname version.
        if cfg!(target_os = "linux") {
            for candidate in versioned_candidates(&self.system_dir()?, name) {
                log_loader_debug!(
                    "trying versioned image",
                    path = tracing::field::display(candidate.display()),
                );
                if let Ok(image) = NativeImage::open(&candidate) {
                    return Ok(Box::new(image));
                }
            }
        }
        Err(err)
    }
}

/// `lib<name>.so.<version>` files in `dir`, shortest (the soname) first.
pub fn versioned_candidates(dir: &Path, name: &LibraryName) -> Vec<PathBuf> {
    let prefix = format!("lib{}.so.", name.as_str());
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<String> = entries
        .filter_map(|entry| entry.ok()?.file_name().into_string().ok())
        .filter(|file| {
            file.strip_prefix(&prefix).is_some_and(|version| {
                !version.is_empty() && version.chars().all(|c| c.is_ascii_digit() || c == '.')
            })
        })
        .collect();
    found.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    found.into_iter().map(|file| dir.join(file)).collect()
}

/// OS system directory (`GetSystemDirectoryW` on Windows).
#[cfg(windows)]
pub fn system_directory() -> Result<PathBuf, LoadError> {
    windows::system_directory()
}

/// OS library directory: the multiarch directory on Debian-style Linux, else `/usr/lib`.
#[cfg(not(windows))]
pub fn system_directory() -> Result<PathBuf, LoadError> {
    let multiarch = PathBuf::from(format!("/usr/lib/{}-linux-gnu", std::env::consts::ARCH));
    if cfg!(target_os = "linux") && multiarch.is_dir() {
        return Ok(multiarch);
    }
    let usr_lib = PathBuf::from("/usr/lib");
    if usr_lib.is_dir() {
        Ok(usr_lib)
    } else {
        Err(LoadError::NoSystemDirectory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_name_accepts_bare_names() {
        assert_eq!(LibraryName::new("version").unwrap().as_str(), "version");
        assert_eq!(LibraryName::new("api-ms-win-core").unwrap().as_str(), "api-ms-win-core");
    }

    #[test]
    fn test_library_name_rejects_traversal() {
        for bad in ["..\\evil", "../evil", "sub/lib", "C:evil", "version.dll", "", "a\0b", ".."] {
            assert!(
                matches!(LibraryName::new(bad), Err(LoadError::InvalidName { .. })),
                "{:?} must be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_library_path_stays_in_system_dir() {
        let loader = SystemLoader::with_system_dir("/sys/dir");
        let name = LibraryName::new("version").unwrap();
        let path = loader.library_path(&name).unwrap();
        assert_eq!(path.parent(), Some(Path::new("/sys/dir")));
        assert!(path.to_string_lossy().contains("version"));
    }

    #[test]
    fn test_config_override_wins() {
        let config = LoaderConfig {
            system_dir: Some(PathBuf::from("/override")),
        };
        let loader = SystemLoader::from_config(&config);
        assert_eq!(loader.system_dir().unwrap(), PathBuf::from("/override"));
    }

    #[test]
    fn test_missing_library_is_rejected_not_panicking() {
        let temp = tempfile::tempdir().unwrap();
        let loader = SystemLoader::with_system_dir(temp.path());
        let name = LibraryName::new("definitely_not_here").unwrap();
        match loader.load(&name) {
            Err(LoadError::Rejected { path, .. }) => assert!(path.starts_with(temp.path())),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("loaded a library that does not exist"),
        }
    }

    #[test]
    fn test_versioned_candidates_prefer_soname() {
        let temp = tempfile::tempdir().unwrap();
        for file in ["libfoo.so.1.2.3", "libfoo.so.1", "libfoo.so", "libfoobar.so.1", "libfoo.so.1.bak"] {
            std::fs::write(temp.path().join(file), b"").unwrap();
        }
        let name = LibraryName::new("foo").unwrap();
        let found = versioned_candidates(temp.path(), &name);
        assert_eq!(
            found,
            vec![temp.path().join("libfoo.so.1"), temp.path().join("libfoo.so.1.2.3")]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linker_script_falls_back_to_soname() {
        let Ok(sysdir) = system_directory() else {
            return;
        };
        if !sysdir.join("libc.so.6").exists() {
            return;
        }
        let loader = SystemLoader::new();
        let image = loader.load(&LibraryName::new("c").unwrap()).unwrap();
        assert!(image.symbol("getpid").is_some());
    }

    #[test]
    fn test_garbage_file_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let name = LibraryName::new("garbage").unwrap();
        std::fs::write(temp.path().join(name.file_name()), b"not an image").unwrap();
        let loader = SystemLoader::with_system_dir(temp.path());
        assert!(matches!(loader.load(&name), Err(LoadError::Rejected { .. })));
    }
}
