//! Attach/detach handling and the post-attach extension point.
//!
//! The extension is an injected [`AttachExtension`] (default [`NoopExtension`]). It
//! runs once, after diagnostics are up and before the host regains control, and
//! gets an [`AttachContext`] for installing interceptions and starting the single
//! background worker.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use shunt_config::{log_attach_info, log_attach_warn, log_hook_info, AttachConfig};
use thiserror::Error;

use crate::cache::{ResolutionCache, Resolution};
use crate::stub::{OperatorPrompt, StdinPrompt};
use crate::SymbolAddress;

#[derive(Error, Debug)]
pub enum InterceptError {
    #[error("genuine module {library} could not be loaded")]
    NoModule { library: String },

    #[error("{library}!{symbol} is not exported by the genuine module")]
    NoTarget { library: String, symbol: String },

    #[error("{library}!{symbol} is already intercepted")]
    AlreadyInstalled { library: String, symbol: String },

    #[error("no interception installer configured")]
    NoInstaller,

    #[error("installer failed: {0}")]
    Installer(String),
}

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("worker thread already running")]
    WorkerAlreadyRunning,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Load(#[from] crate::loader::LoadError),

    #[error(transparent)]
    Intercept(#[from] InterceptError),

    #[error("{0}")]
    Other(String),
}

/// Redirects calls from one entry point to another.
pub trait InterceptionInstaller: Send + Sync {
    /// Redirect calls at `target` to `replacement` and return a callable trampoline
    /// that runs the original code.
    ///
    /// # Safety
    /// Both addresses must be entry points with the same signature and calling
    /// convention; the installer patches live code.
    unsafe fn install(
        &self,
        target: SymbolAddress,
        replacement: SymbolAddress,
    ) -> Result<SymbolAddress, InterceptError>;
}

/// Post-attach strategy.
pub trait AttachExtension: Send + Sync {
    fn name(&self) -> &str;

    fn on_attach(&self, ctx: &AttachContext<'_>) -> Result<(), ExtensionError>;
}

/// The default: nothing beyond plain forwarding.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExtension;

impl AttachExtension for NoopExtension {
    fn name(&self) -> &str {
        "noop"
    }

    fn on_attach(&self, _ctx: &AttachContext<'_>) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// An installed interception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hook {
    pub target: SymbolAddress,
    pub replacement: SymbolAddress,
    pub original: SymbolAddress,
}

/// Installed interceptions keyed by `(library, symbol)`.
#[derive(Debug, Default)]
pub struct HookTable {
    hooks: Mutex<HashMap<(String, String), Hook>>,
}

impl HookTable {
    pub fn get(&self, library: &str, symbol: &str) -> Option<Hook> {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(library.to_string(), symbol.to_string()))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What an extension may touch during attach.
pub struct AttachContext<'a> {
    resolver: &'a Arc<ResolutionCache>,
    installer: Option<&'a dyn InterceptionInstaller>,
    hooks: &'a HookTable,
    worker: &'a Mutex<Option<JoinHandle<()>>>,
}

impl<'a> AttachContext<'a> {
    pub fn resolver(&self) -> &Arc<ResolutionCache> {
        self.resolver
    }

    /// Redirect the genuine `library!symbol` to `replacement`.
    ///
    /// Returns the original trampoline, also retrievable later via
    /// [`Lifecycle::original`]. A symbol that only resolves to the stub is refused:
    /// patching the stub would redirect every unresolved export at once.
    ///
    /// # Safety
    /// `replacement` must match the target's signature and calling convention.
    pub unsafe fn intercept(
        &self,
        library: &str,
        symbol: &str,
        replacement: SymbolAddress,
    ) -> Result<SymbolAddress, InterceptError> {
        let installer = self.installer.ok_or(InterceptError::NoInstaller)?;

        let target = match self.resolver.resolve(library, symbol) {
            Resolution::Resolved(addr) => addr,
            Resolution::Stubbed(_) => {
                return Err(InterceptError::NoTarget {
                    library: library.to_string(),
                    symbol: symbol.to_string(),
                })
            }
            Resolution::NoModule => {
                return Err(InterceptError::NoModule {
                    library: library.to_string(),
                })
            }
        };

        let key = (library.to_string(), symbol.to_string());
        let mut hooks = self.hooks.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if hooks.contains_key(&key) {
            return Err(InterceptError::AlreadyInstalled {
                library: key.0,
                symbol: key.1,
            });
        }

        let original = installer.install(target, replacement)?;
        log_hook_info!(
            "interception installed",
            library = library,
            symbol = symbol,
            target = tracing::field::display(target),
            original = tracing::field::display(original),
        );
        hooks.insert(
            key,
            Hook {
                target,
                replacement,
                original,
            },
        );
        Ok(original)
    }

    /// Start the background worker. Only one may ever run.
    pub fn spawn_worker<F>(&self, name: &str, task: F) -> Result<(), ExtensionError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ExtensionError::WorkerAlreadyRunning);
        }
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(task)?;
        log_attach_info!("worker thread started", thread = name);
        *slot = Some(handle);
        Ok(())
    }
}

/// Owns the attach sequence and everything the extension installs.
pub struct Lifecycle {
    resolver: Arc<ResolutionCache>,
    config: AttachConfig,
    extension: Box<dyn AttachExtension>,
    installer: Option<Box<dyn InterceptionInstaller>>,
    prompt: Box<dyn OperatorPrompt>,
    hooks: HookTable,
    worker: Mutex<Option<JoinHandle<()>>>,
    attached: AtomicBool,
}

impl Lifecycle {
    pub fn new(resolver: Arc<ResolutionCache>, config: AttachConfig) -> Self {
        Self {
            resolver,
            config,
            extension: Box::new(NoopExtension),
            installer: None,
            prompt: Box::new(StdinPrompt),
            hooks: HookTable::default(),
            worker: Mutex::new(None),
            attached: AtomicBool::new(false),
        }
    }

    pub fn with_extension(mut self, extension: Box<dyn AttachExtension>) -> Self {
        self.extension = extension;
        self
    }

    pub fn with_installer(mut self, installer: Box<dyn InterceptionInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_prompt(mut self, prompt: Box<dyn OperatorPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn resolver(&self) -> &Arc<ResolutionCache> {
        &self.resolver
    }

    /// Run the attach sequence. Later calls are no-ops and return `false`.
    ///
    /// An extension failure is logged and does not stop the attach; forwarding
    /// keeps working without the extension's extras.
    pub fn attach(&self) -> bool {
        if self.attached.swap(true, Ordering::SeqCst) {
            return false;
        }

        if self.config.banner {
            log_attach_info!("== Proxy Loaded ==", pid = std::process::id());
        }

        let ctx = AttachContext {
            resolver: &self.resolver,
            installer: self.installer.as_deref(),
            hooks: &self.hooks,
            worker: &self.worker,
        };
        match self.extension.on_attach(&ctx) {
            Ok(()) => log_attach_info!("extension ran", extension = self.extension.name()),
            Err(err) => log_attach_warn!(
                "extension failed, continuing with plain forwarding",
                extension = self.extension.name(),
                error = tracing::field::display(&err),
            ),
        }

        if self.config.pause_after_init {
            self.prompt
                .wait_for_enter("init done, press Enter to start main program");
        }
        true
    }

    /// Process detach. The genuine modules stay loaded; nothing else to release.
    pub fn detach(&self) {
        let stats = self.resolver.stats();
        log_attach_info!(
            "proxy detaching",
            module_loads = stats.module_loads,
            unresolved = stats.unresolved,
            hooks = self.hooks.len(),
        );
    }

    /// Original trampoline for an intercepted export.
    pub fn original(&self, library: &str, symbol: &str) -> Option<SymbolAddress> {
        self.hooks.get(library, symbol).map(|hook| hook.original)
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    /// Wait for the worker thread. Used by tests and orderly shutdown paths.
    pub fn join_worker(&self) -> bool {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => handle.join().is_ok(),
            None => false,
        }
    }
}
