//! Unresolved-call handling.
//!
//! The proxy hands out a single stub address for every export the genuine module
//! lacks. When the host actually calls it, the proxy's `extern` stub lands here:
//! report, then halt under the configured [`StubPolicy`]. Control never returns to
//! the caller, whose arguments and return slot the stub knows nothing about.

use std::io::{BufRead, Write};
use std::process::{Command, Stdio};
use std::time::Duration;

use shunt_config::{log_stub_error, StubConfig, StubPolicy};

/// Blocking operator interaction: print a message, wait for Enter.
pub trait OperatorPrompt: Send + Sync {
    fn wait_for_enter(&self, message: &str);
}

/// Prompt on the process's stdout/stdin (the console the proxy attached).
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

impl OperatorPrompt for StdinPrompt {
    fn wait_for_enter(&self, message: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{message}");
        let _ = stdout.flush();
        drop(stdout);

        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }
}

/// Executes the configured halt policy for an unresolved call.
pub struct StubHandler {
    config: StubConfig,
    prompt: Box<dyn OperatorPrompt>,
}

impl StubHandler {
    pub fn new(config: StubConfig) -> Self {
        Self::with_prompt(config, Box::new(StdinPrompt))
    }

    pub fn with_prompt(config: StubConfig, prompt: Box<dyn OperatorPrompt>) -> Self {
        Self { config, prompt }
    }

    pub fn policy(&self) -> StubPolicy {
        self.config.policy
    }

    /// Report the unresolved call and block according to policy.
    /// Returns the exit code the process should terminate with.
    ///
    /// `last_miss` is the most recent `(library, symbol)` that resolved to the stub;
    /// the stub itself cannot know which export it stands in for.
    pub fn handle(&self, last_miss: Option<(&str, &str)>) -> i32 {
        let (library, symbol) = last_miss.unwrap_or(("?", "?"));
        log_stub_error!(
            "NO FPTR RESOLVED: unresolved export called",
            library = library,
            symbol = symbol,
            pid = std::process::id(),
            policy = tracing::field::debug(self.config.policy),
        );

        match self.config.policy {
            StubPolicy::Exit => {}
            StubPolicy::Pause => self.pause(),
            StubPolicy::Debugger => {
                if let Err(err) = self.launch_debugger() {
                    log_stub_error!(
                        "debugger launch failed, waiting for operator instead",
                        error = tracing::field::display(&err),
                    );
                    self.pause();
                }
            }
        }
        self.config.exit_code
    }

    /// [`handle`](Self::handle), then terminate the process.
    pub fn halt(&self, last_miss: Option<(&str, &str)>) -> ! {
        let code = self.handle(last_miss);
        std::process::exit(code)
    }

    fn pause(&self) {
        self.prompt
            .wait_for_enter("NO FPTR RESOLVED! Press Enter to terminate the process.");
    }

    /// Start a debugger against this process and wait until it is attached, then break.
    pub fn launch_debugger(&self) -> std::io::Result<()> {
        if !debugger::can_detect() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "debugger attachment cannot be detected on this platform",
            ));
        }

        let pid = std::process::id();
        let mut command = self.debugger_command(pid)?;
        command
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| std::io::Error::new(e.kind(), format!("{:?}: {e}", command)))?;

        while !debugger::is_present() {
            std::thread::sleep(Duration::from_millis(100));
        }
        debugger::breakpoint();
        Ok(())
    }

    /// The configured command with `{pid}` substituted, or the platform default.
    pub fn debugger_command(&self, pid: u32) -> std::io::Result<Command> {
        match &self.config.debugger_command {
            Some(template) => {
                let expanded = template.replace("{pid}", &pid.to_string());
                let mut parts = expanded.split_whitespace();
                let program = parts.next().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "empty stub.debugger_command",
                    )
                })?;
                let mut command = Command::new(program);
                command.args(parts);
                Ok(command)
            }
            None => debugger::default_command(pid),
        }
    }
}

#[cfg(windows)]
mod debugger {
    use std::process::Command;
    use windows_sys::Win32::System::Diagnostics::Debug::{DebugBreak, IsDebuggerPresent};

    pub fn default_command(pid: u32) -> std::io::Result<Command> {
        let sysdir = crate::loader::system_directory()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()))?;
        let mut command = Command::new(sysdir.join("vsjitdebugger.exe"));
        command.arg("-p").arg(pid.to_string());
        Ok(command)
    }

    pub fn can_detect() -> bool {
        true
    }

    pub fn is_present() -> bool {
        unsafe { IsDebuggerPresent() != 0 }
    }

    pub fn breakpoint() {
        unsafe { DebugBreak() }
    }
}

#[cfg(not(windows))]
mod debugger {
    use std::process::Command;

    pub fn default_command(pid: u32) -> std::io::Result<Command> {
        let mut command = Command::new("gdb");
        command.arg("-p").arg(pid.to_string());
        Ok(command)
    }

    pub fn can_detect() -> bool {
        cfg!(target_os = "linux")
    }

    /// `TracerPid` in `/proc/self/status` is non-zero while a tracer is attached.
    pub fn is_present() -> bool {
        std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|status| {
                status
                    .lines()
                    .find_map(|line| line.strip_prefix("TracerPid:"))
                    .map(|pid| pid.trim() != "0")
            })
            .unwrap_or(false)
    }

    pub fn breakpoint() {
        unsafe {
            libc::raise(libc::SIGTRAP);
        }
    }
}
