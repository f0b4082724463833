//! Two-level resolution cache: library name → loaded module → symbol address.
//!
//! Locking:
//! - `modules` is one process-wide lock, held across the genuine load so that
//!   concurrent first requests for a library produce exactly one image load.
//! - each module's symbol map has its own lock; lookup and insert happen under it,
//!   so every thread observes the address the first resolver stored.
//!
//! Library load failures are not cached (the next call retries). Symbol lookup
//! failures are cached as `None` so an absent export is queried and reported once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shunt_config::{log_loader_info, log_loader_warn, log_resolve_trace, log_resolve_warn};

use crate::loader::{ImageLoader, LibraryName, ModuleImage};
use crate::SymbolAddress;

/// Outcome of a single resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The genuine export.
    Resolved(SymbolAddress),
    /// The module exists but does not export the symbol; this is the stub address.
    Stubbed(SymbolAddress),
    /// The genuine module could not be loaded.
    NoModule,
}

impl Resolution {
    /// Callable address, if any. `NoModule` has none.
    pub fn address(self) -> Option<SymbolAddress> {
        match self {
            Resolution::Resolved(addr) | Resolution::Stubbed(addr) => Some(addr),
            Resolution::NoModule => None,
        }
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, Resolution::Resolved(_))
    }
}

/// A genuine library kept loaded for the rest of the process.
pub struct LoadedModule {
    name: LibraryName,
    image: Box<dyn ModuleImage>,
    symbols: Mutex<HashMap<String, Option<SymbolAddress>>>,
}

impl LoadedModule {
    fn new(name: LibraryName, image: Box<dyn ModuleImage>) -> Self {
        Self {
            name,
            image,
            symbols: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &LibraryName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.image.path()
    }

    /// Number of memoised symbols, including cached misses.
    pub fn cached_symbols(&self) -> usize {
        lock(&self.symbols).len()
    }
}

/// Counters for the CLI and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub module_loads: u64,
    pub load_failures: u64,
    pub symbol_queries: u64,
    pub cache_hits: u64,
    pub unresolved: u64,
}

#[derive(Default)]
struct Counters {
    module_loads: AtomicU64,
    load_failures: AtomicU64,
    symbol_queries: AtomicU64,
    cache_hits: AtomicU64,
    unresolved: AtomicU64,
}

/// Resolves `(library, symbol)` pairs against genuine images, memoising results.
pub struct ResolutionCache {
    loader: Box<dyn ImageLoader>,
    stub: SymbolAddress,
    modules: Mutex<HashMap<String, Arc<LoadedModule>>>,
    last_miss: Mutex<Option<(String, String)>>,
    counters: Counters,
}

impl ResolutionCache {
    /// `stub` is returned in place of every export the genuine module lacks.
    pub fn new(loader: Box<dyn ImageLoader>, stub: SymbolAddress) -> Self {
        Self {
            loader,
            stub,
            modules: Mutex::new(HashMap::new()),
            last_miss: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn stub_address(&self) -> SymbolAddress {
        self.stub
    }

    /// Resolve `symbol` in the genuine `library`, loading it on first use.
    pub fn resolve(&self, library: &str, symbol: &str) -> Resolution {
        let Some(module) = self.module(library) else {
            return Resolution::NoModule;
        };

        let mut symbols = lock(&module.symbols);
        let cached = match symbols.get(symbol) {
            Some(cached) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                *cached
            }
            None => {
                self.counters.symbol_queries.fetch_add(1, Ordering::Relaxed);
                let found = module.image.symbol(symbol);
                symbols.insert(symbol.to_string(), found);
                match found {
                    Some(addr) => {
                        log_resolve_trace!(
                            "resolved genuine symbol",
                            library = library,
                            symbol = symbol,
                            address = tracing::field::display(addr),
                        );
                    }
                    None => {
                        self.counters.unresolved.fetch_add(1, Ordering::Relaxed);
                        *lock(&self.last_miss) = Some((library.to_string(), symbol.to_string()));
                        log_resolve_warn!(
                            "symbol not exported by genuine module, substituting stub",
                            library = library,
                            symbol = symbol,
                        );
                    }
                }
                found
            }
        };

        match cached {
            Some(addr) => Resolution::Resolved(addr),
            None => Resolution::Stubbed(self.stub),
        }
    }

    /// Dispatch form of [`resolve`](Self::resolve): always a callable address.
    /// A missing module also maps to the stub.
    pub fn resolve_or_stub(&self, library: &str, symbol: &str) -> SymbolAddress {
        self.resolve(library, symbol).address().unwrap_or(self.stub)
    }

    /// The loaded module for `library`, loading it if needed.
    ///
    /// `None` when the name is invalid or the load failed. Nothing is cached in
    /// that case, so a later call tries again.
    pub fn module(&self, library: &str) -> Option<Arc<LoadedModule>> {
        let mut modules = lock(&self.modules);
        if let Some(module) = modules.get(library) {
            return Some(Arc::clone(module));
        }

        log_loader_info!("module not loaded, loading genuine copy", library = library);

        let loaded = LibraryName::new(library)
            .and_then(|name| self.loader.load(&name).map(|image| (name, image)));

        match loaded {
            Ok((name, image)) => {
                self.counters.module_loads.fetch_add(1, Ordering::Relaxed);
                log_loader_info!(
                    "genuine module loaded",
                    library = library,
                    path = tracing::field::display(image.path().display()),
                );
                let module = Arc::new(LoadedModule::new(name, image));
                modules.insert(library.to_string(), Arc::clone(&module));
                Some(module)
            }
            Err(err) => {
                self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                log_loader_warn!(
                    "failed to load genuine module",
                    library = library,
                    error = tracing::field::display(&err),
                );
                None
            }
        }
    }

    /// Names and paths of every loaded genuine module.
    pub fn loaded_modules(&self) -> Vec<(String, PathBuf)> {
        let mut out: Vec<_> = lock(&self.modules)
            .iter()
            .map(|(name, module)| (name.clone(), module.path().to_path_buf()))
            .collect();
        out.sort();
        out
    }

    /// The most recent `(library, symbol)` that resolved to the stub.
    pub fn last_miss(&self) -> Option<(String, String)> {
        lock(&self.last_miss).clone()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.counters;
        CacheStats {
            module_loads: c.module_loads.load(Ordering::Relaxed),
            load_failures: c.load_failures.load(Ordering::Relaxed),
            symbol_queries: c.symbol_queries.load(Ordering::Relaxed),
            cache_hits: c.cache_hits.load(Ordering::Relaxed),
            unresolved: c.unresolved.load(Ordering::Relaxed),
        }
    }
}

/// A panic while holding a cache lock leaves the maps consistent (every insert is a
/// single call), so poisoning is ignored rather than propagated into the host.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
