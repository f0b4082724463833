//! `version.dll` exports.
//!
//! Build output is renamed to `version.dll` and placed next to the host
//! executable. Every documented export forwards to the genuine copy in the
//! system directory.

#![allow(non_snake_case)]

use std::ffi::c_void;

forward! {
    "version" =>
    fn GetFileVersionInfoA(file: *const u8, handle: u32, len: u32, data: *mut c_void) -> i32;
    fn GetFileVersionInfoW(file: *const u16, handle: u32, len: u32, data: *mut c_void) -> i32;
    fn GetFileVersionInfoExA(flags: u32, file: *const u8, handle: u32, len: u32, data: *mut c_void) -> i32;
    fn GetFileVersionInfoExW(flags: u32, file: *const u16, handle: u32, len: u32, data: *mut c_void) -> i32;
    fn GetFileVersionInfoSizeA(file: *const u8, handle: *mut u32) -> u32;
    fn GetFileVersionInfoSizeW(file: *const u16, handle: *mut u32) -> u32;
    fn GetFileVersionInfoSizeExA(flags: u32, file: *const u8, handle: *mut u32) -> u32;
    fn GetFileVersionInfoSizeExW(flags: u32, file: *const u16, handle: *mut u32) -> u32;
    fn VerQueryValueA(block: *const c_void, sub_block: *const u8, buffer: *mut *mut c_void, len: *mut u32) -> i32;
    fn VerQueryValueW(block: *const c_void, sub_block: *const u16, buffer: *mut *mut c_void, len: *mut u32) -> i32;
    fn VerLanguageNameA(lang: u32, buf: *mut u8, len: u32) -> u32;
    fn VerLanguageNameW(lang: u32, buf: *mut u16, len: u32) -> u32;
    fn VerFindFileA(
        flags: u32,
        file: *const u8,
        win_dir: *const u8,
        app_dir: *const u8,
        cur_dir: *mut u8,
        cur_dir_len: *mut u32,
        dest_dir: *mut u8,
        dest_dir_len: *mut u32,
    ) -> u32;
    fn VerFindFileW(
        flags: u32,
        file: *const u16,
        win_dir: *const u16,
        app_dir: *const u16,
        cur_dir: *mut u16,
        cur_dir_len: *mut u32,
        dest_dir: *mut u16,
        dest_dir_len: *mut u32,
    ) -> u32;
    fn VerInstallFileA(
        flags: u32,
        src_file: *const u8,
        dest_file: *const u8,
        src_dir: *const u8,
        dest_dir: *const u8,
        cur_dir: *const u8,
        tmp_file: *mut u8,
        tmp_file_len: *mut u32,
    ) -> u32;
    fn VerInstallFileW(
        flags: u32,
        src_file: *const u16,
        dest_file: *const u16,
        src_dir: *const u16,
        dest_dir: *const u16,
        cur_dir: *const u16,
        tmp_file: *mut u16,
        tmp_file_len: *mut u32,
    ) -> u32;
}
