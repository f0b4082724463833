/// Typed forward for an export of the genuine library.
///
/// Each entry becomes an unmangled `extern "system"` function with the given
/// signature. The body resolves the genuine address through the process-wide
/// resolver (the stub when unresolved) and tail-calls it with the same arguments.
///
/// # Usage:
/// ```ignore
/// forward! {
///     "version" =>
///     fn VerLanguageNameW(lang: u32, buf: *mut u16, len: u32) -> u32;
/// }
/// ```
#[allow(unused_macros)]
macro_rules! forward {
    ($lib:literal => $( fn $name:ident($($arg:ident: $ty:ty),* $(,)?) -> $ret:ty; )*) => {
        $(
            #[no_mangle]
            pub unsafe extern "system" fn $name($($arg: $ty),*) -> $ret {
                let addr = $crate::state::Proxy::get()
                    .resolver()
                    .resolve_or_stub($lib, stringify!($name));
                let real = std::mem::transmute::<
                    *const libc::c_void,
                    unsafe extern "system" fn($($ty),*) -> $ret,
                >(addr.as_ptr());
                real($($arg),*)
            }
        )*
    };
}
