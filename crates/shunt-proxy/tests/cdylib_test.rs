//! Integration tests for the built proxy image.
//!
//! The image attaches as soon as it is mapped, so every check runs in a child
//! process: this test binary re-executes itself with `child_host` selected and
//! `dlopen`s the proxy there. The parent asserts on the child's exit status and
//! output, which also covers teardown of a host that loaded the proxy.

#![cfg(target_os = "linux")]

use std::ffi::{c_char, c_void, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::OnceLock;

use tempfile::TempDir;

const IMAGE_ENV: &str = "SHUNT_TEST_PROXY_IMAGE";
const MODE_ENV: &str = "SHUNT_TEST_CHILD_MODE";

type GetFptr = unsafe extern "C" fn(*const c_char, *const c_char) -> *const c_void;

/// Build the cdylib into the same profile directory as this test binary.
fn proxy_image() -> &'static Path {
    static IMAGE: OnceLock<PathBuf> = OnceLock::new();
    IMAGE.get_or_init(|| {
        let exe = std::env::current_exe().unwrap();
        let profile_dir = exe.parent().and_then(Path::parent).unwrap().to_path_buf();

        let cargo = std::env::var_os("CARGO").unwrap_or_else(|| "cargo".into());
        let mut build = Command::new(cargo);
        build.args(["build", "--package", "shunt-proxy", "--quiet"]);
        if profile_dir.file_name().is_some_and(|name| name == "release") {
            build.arg("--release");
        }
        let status = build.status().expect("Failed to execute cargo build");
        assert!(status.success(), "building shunt-proxy failed");

        let image = profile_dir.join("libshunt_proxy.so");
        assert!(image.exists(), "{} was not produced", image.display());
        image
    })
}

/// Path of the libc this process runs against, from `/proc/self/maps`.
fn loaded_libc() -> Option<PathBuf> {
    let maps = std::fs::read_to_string("/proc/self/maps").ok()?;
    maps.lines()
        .filter_map(|line| line.split_whitespace().nth(5))
        .find(|path| {
            let file = path.rsplit('/').next().unwrap_or("");
            file.starts_with("libc.so") || file.starts_with("libc-")
        })
        .map(PathBuf::from)
}

/// A system directory holding libc as `libgenuinec.so`, and an empty config home.
struct Fixture {
    sysdir: TempDir,
    home: TempDir,
}

impl Fixture {
    fn new() -> Option<Self> {
        let libc_path = loaded_libc()?;
        let sysdir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(libc_path, sysdir.path().join("libgenuinec.so")).unwrap();
        Some(Self {
            sysdir,
            home: TempDir::new().unwrap(),
        })
    }

    fn run_child(&self, mode: &str) -> Output {
        Command::new(std::env::current_exe().unwrap())
            .args(["child_host", "--exact", "--nocapture", "--test-threads=1"])
            .env(IMAGE_ENV, proxy_image())
            .env(MODE_ENV, mode)
            .env("HOME", self.home.path())
            .env("XDG_CONFIG_HOME", self.home.path().join(".config"))
            .env("SHUNT_SYSTEM_DIR", self.sysdir.path())
            .env("SHUNT_STUB_POLICY", "exit")
            .env("SHUNT_LOG_LEVEL", "info")
            .env_remove("SHUNT_LOG")
            .env_remove("RUST_LOG")
            .env_remove("SHUNT_LOG_FILE")
            .env_remove("SHUNT_PAUSE")
            .output()
            .expect("Failed to execute child host")
    }
}

fn cstr(s: &[u8]) -> CString {
    CString::new(s).unwrap()
}

unsafe fn resolve(get_fptr: GetFptr, lib: &[u8], sym: &[u8]) -> *const c_void {
    let lib = cstr(lib);
    let sym = cstr(sym);
    get_fptr(lib.as_ptr(), sym.as_ptr())
}

/// Host side. A no-op unless launched by one of the tests below.
#[test]
fn child_host() {
    let (Some(image), Ok(mode)) = (std::env::var_os(IMAGE_ENV), std::env::var(MODE_ENV)) else {
        return;
    };

    let image = cstr(image.as_bytes());
    let handle = unsafe { libc::dlopen(image.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
    assert!(!handle.is_null(), "dlopen of the proxy failed");
    let sym = cstr(b"get_fptr");
    let raw = unsafe { libc::dlsym(handle, sym.as_ptr()) };
    assert!(!raw.is_null(), "get_fptr is not exported");
    let get_fptr: GetFptr = unsafe { std::mem::transmute::<*mut c_void, GetFptr>(raw) };

    match mode.as_str() {
        "dispatch" => unsafe {
            let stub = get_fptr(std::ptr::null(), std::ptr::null());
            assert!(!stub.is_null());

            let getpid = resolve(get_fptr, b"genuinec", b"getpid");
            assert!(!getpid.is_null());
            assert_ne!(getpid, stub);
            assert_eq!(resolve(get_fptr, b"genuinec", b"getpid"), getpid);
            let call: unsafe extern "C" fn() -> libc::pid_t = std::mem::transmute(getpid);
            assert_eq!(call() as u32, std::process::id());

            assert_eq!(resolve(get_fptr, b"genuinec", b"ThisSymbolDoesNotExist"), stub);
            assert_eq!(resolve(get_fptr, b"..\\evil", b"getpid"), stub);
            assert_eq!(resolve(get_fptr, b"version", b"VerQueryValueA"), stub);
            assert_eq!(resolve(get_fptr, b"genuinec", b"\xff\xfe"), stub);
            let lib = cstr(b"genuinec");
            assert_eq!(get_fptr(lib.as_ptr(), std::ptr::null()), stub);

            println!("dispatch checks passed");
        },
        "stub" => unsafe {
            let stub = resolve(get_fptr, b"genuinec", b"NoSuchExport");
            let call: extern "C" fn() -> ! = std::mem::transmute(stub);
            call();
        },
        other => panic!("unknown child mode {other}"),
    }
}

#[test]
fn test_get_fptr_never_returns_null() {
    let Some(fixture) = Fixture::new() else {
        eprintln!("skipping: no dynamically loaded libc found");
        return;
    };
    let output = fixture.run_child("dispatch");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(0), "stdout: {stdout}\nstderr: {stderr}");
    assert!(stdout.contains("dispatch checks passed"));
    assert!(stderr.contains("== Proxy Loaded =="));
}

#[test]
fn test_host_exits_cleanly_after_loading_proxy() {
    let Some(fixture) = Fixture::new() else {
        return;
    };
    let output = fixture.run_child("dispatch");

    // A destructor touching thread-local state at teardown would abort here.
    assert!(output.status.success(), "status: {:?}", output.status);
    assert!(!String::from_utf8_lossy(&output.stderr).contains("panicked"));
}

#[test]
fn test_unresolved_call_terminates_with_exit_code() {
    let Some(fixture) = Fixture::new() else {
        return;
    };
    let output = fixture.run_child("stub");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert_eq!(output.status.code(), Some(3), "stderr: {stderr}");
    assert!(stderr.contains("NO FPTR RESOLVED"));
    assert!(stderr.contains("NoSuchExport"));
}
