//! Process-wide proxy state.
//!
//! There is exactly one [`Proxy`] per process. It is built on first use (normally
//! by the attach constructor), lives until the process exits, and is never torn
//! down: resolved addresses handed to the host must stay valid.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use shunt_config::logging::{init_logging, LoggingGuard};
use shunt_config::{log_attach_warn, Config};
use shunt_core::{
    CompanionExtension, Lifecycle, ResolutionCache, StubHandler, SymbolAddress, SystemLoader,
};

static PROXY: OnceCell<Proxy> = OnceCell::new();

pub struct Proxy {
    config: Config,
    resolver: Arc<ResolutionCache>,
    lifecycle: Lifecycle,
    stub: StubHandler,
    _logging: LoggingGuard,
}

impl Proxy {
    /// The proxy, initialising it on first call.
    pub fn get() -> &'static Proxy {
        PROXY.get_or_init(Proxy::init)
    }

    /// The proxy if it was already initialised. Used on detach.
    pub fn try_get() -> Option<&'static Proxy> {
        PROXY.get()
    }

    fn init() -> Proxy {
        let (config, config_error) = match Config::load() {
            Ok(config) => (config, None),
            Err(err) => (Config::default(), Some(err)),
        };

        #[cfg(windows)]
        if config.attach.alloc_console {
            crate::entry::alloc_console();
        }

        let logging = init_logging(config.log.level, config.log.file.as_deref());
        if let Some(err) = config_error {
            log_attach_warn!(
                "config could not be loaded, using defaults",
                error = tracing::field::display(&err),
            );
        }

        let stub_address = SymbolAddress::of_stub(crate::dispatch::unresolved_stub);
        let resolver = Arc::new(ResolutionCache::new(
            Box::new(SystemLoader::from_config(&config.loader)),
            stub_address,
        ));

        let mut lifecycle = Lifecycle::new(Arc::clone(&resolver), config.attach.clone());
        if let Some(companion) = CompanionExtension::from_config(&config.companion, &host_dir()) {
            lifecycle = lifecycle.with_extension(Box::new(companion));
        }

        let stub = StubHandler::new(config.stub.clone());

        Proxy {
            config,
            resolver,
            lifecycle,
            stub,
            _logging: logging,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<ResolutionCache> {
        &self.resolver
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn stub(&self) -> &StubHandler {
        &self.stub
    }
}

/// Directory of the host executable; companion paths are relative to it.
fn host_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}
