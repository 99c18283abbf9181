//! C FFI surface for seamloop.
//!
//! Pattern: opaque LoopHandle + C strings + JSON serialization.
//!
//! Android (JNI shim), iOS (Swift), Flutter (`dart:ffi`) and anything else
//! with a C FFI can drive a gapless loop through these calls. Every handle
//! from `seamloop_open*` must be passed to `seamloop_close` exactly once;
//! that is the only way native decoder resources are released.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use seamloop_core::{LoopCommand, LoopPlayer, MediaBackend, PlayerConfig, Resource};

// ---------------------------------------------------------------------------
// Error handling (thread-local last error)
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(msg: String) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(msg));
}

fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Returns the last error message (caller frees with `seamloop_string_free`).
#[no_mangle]
pub extern "C" fn seamloop_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow_mut()
            .take()
            .and_then(|s| CString::new(s).ok())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut())
    })
}

/// Frees a string returned from seamloop FFI.
///
/// # Safety
/// Must be a pointer returned from this FFI and not already freed.
#[no_mangle]
pub unsafe extern "C" fn seamloop_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------------------------------------------------------------------------
// Opaque handle
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct LoopHandle {
    _private: [u8; 0],
}

struct LoopHandleInner {
    player: LoopPlayer,
}

fn into_handle(player: LoopPlayer) -> *mut LoopHandle {
    Box::into_raw(Box::new(LoopHandleInner { player })) as *mut LoopHandle
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Opens a loop player for the audio file at `path` on the default output
/// device. The player is primed but not started. Returns NULL on error.
///
/// # Safety
/// `path` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn seamloop_open(path: *const c_char) -> *mut LoopHandle {
    clear_error();
    let path = match read_cstr(path) {
        Ok(p) => p,
        Err(e) => return err_null_handle(e),
    };
    open(&path, &PlayerConfig::default())
}

/// Like `seamloop_open`, with a `PlayerConfig` JSON object. Invalid config
/// JSON is an error; unknown or missing fields fall back to defaults.
///
/// # Safety
/// `path` and `config_json` must be valid null-terminated C strings.
#[no_mangle]
pub unsafe extern "C" fn seamloop_open_with_config(
    path: *const c_char,
    config_json: *const c_char,
) -> *mut LoopHandle {
    clear_error();
    let path = match read_cstr(path) {
        Ok(p) => p,
        Err(e) => return err_null_handle(e),
    };
    let json = match read_cstr(config_json) {
        Ok(j) => j,
        Err(e) => return err_null_handle(e),
    };
    match PlayerConfig::from_json_str(&json) {
        Ok(config) => open(&path, &config),
        Err(e) => err_null_handle(e.to_string()),
    }
}

fn open(path: &str, config: &PlayerConfig) -> *mut LoopHandle {
    match seamloop_core::backend::native::NativeBackend::new() {
        Ok(backend) => open_on(Arc::new(backend), path, config),
        Err(e) => err_null_handle(e.to_string()),
    }
}

fn open_on(backend: Arc<dyn MediaBackend>, path: &str, config: &PlayerConfig) -> *mut LoopHandle {
    match LoopPlayer::with_config(backend, Resource::from_path(path), config) {
        Ok(player) => into_handle(player),
        Err(e) => err_null_handle(e.to_string()),
    }
}

/// Closes the player, releases both handles, and frees `handle`.
#[no_mangle]
pub extern "C" fn seamloop_close(handle: *mut LoopHandle) {
    if !handle.is_null() {
        unsafe {
            let inner = Box::from_raw(handle as *mut LoopHandleInner);
            inner.player.close();
        }
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

/// Starts or resumes looping. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn seamloop_start(handle: *mut LoopHandle) -> i32 {
    run(handle, |p| p.start())
}

/// Pauses looping. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn seamloop_pause(handle: *mut LoopHandle) -> i32 {
    run(handle, |p| p.pause())
}

/// Sets volume (0.0-1.0) on both handles. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn seamloop_set_volume(handle: *mut LoopHandle, volume: f32) -> i32 {
    run(handle, |p| p.set_volume(volume))
}

/// Sets the speed used from the next loop on. Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn seamloop_set_speed(handle: *mut LoopHandle, speed: f32) -> i32 {
    run(handle, |p| p.set_playback_speed(speed))
}

/// Sets the per-loop speed increment (0 disables). Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn seamloop_set_speed_increment(handle: *mut LoopHandle, increment: f32) -> i32 {
    run(handle, |p| p.set_auto_advance_speed_increment(increment))
}

/// Mutes (non-zero) or unmutes (0). Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn seamloop_set_muted(handle: *mut LoopHandle, muted: i32) -> i32 {
    run(handle, |p| p.set_muted(muted != 0))
}

/// Runs a LoopCommand JSON, e.g. `{"action":"setvolume","volume":0.5}`.
/// A `close` command closes the player but does not free `handle`.
/// Returns 1 on success, 0 on error.
#[no_mangle]
pub extern "C" fn seamloop_command(handle: *mut LoopHandle, json: *const c_char) -> i32 {
    clear_error();
    let json_str = match read_cstr(json) {
        Ok(s) => s,
        Err(e) => {
            set_error(e);
            return 0;
        }
    };
    let cmd: LoopCommand = match serde_json::from_str(&json_str) {
        Ok(v) => v,
        Err(e) => {
            set_error(e.to_string());
            return 0;
        }
    };
    run(handle, |p| p.apply(cmd))
}

/// Get the player status as JSON (caller frees).
#[no_mangle]
pub extern "C" fn seamloop_status(handle: *mut LoopHandle) -> *mut c_char {
    clear_error();
    let player = match player_ref(handle) {
        Ok(p) => p,
        Err(e) => return err_null(e),
    };
    match serde_json::to_string(&player.status()) {
        Ok(json) => to_cstr(json),
        Err(e) => err_null(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Returns the FFI API version.
#[no_mangle]
pub extern "C" fn seamloop_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn player_ref<'a>(handle: *mut LoopHandle) -> Result<&'a LoopPlayer, String> {
    if handle.is_null() {
        return Err("null loop handle".into());
    }
    let inner = unsafe { &*(handle as *mut LoopHandleInner) };
    Ok(&inner.player)
}

/// Run `f` against the player, mapping errors to 0 + last error.
fn run(handle: *mut LoopHandle, f: impl FnOnce(&LoopPlayer) -> seamloop_core::Result<()>) -> i32 {
    clear_error();
    let player = match player_ref(handle) {
        Ok(p) => p,
        Err(e) => {
            set_error(e);
            return 0;
        }
    };
    match f(player) {
        Ok(()) => 1,
        Err(e) => {
            set_error(e.to_string());
            0
        }
    }
}

fn read_cstr(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("null string pointer".into());
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(String::from)
            .map_err(|_| "invalid utf-8".into())
    }
}

fn to_cstr(s: String) -> *mut c_char {
    CString::new(s)
        .map(|c| c.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn err_null(msg: String) -> *mut c_char {
    set_error(msg);
    ptr::null_mut()
}

fn err_null_handle(msg: String) -> *mut LoopHandle {
    set_error(msg);
    ptr::null_mut()
}

// ---------------------------------------------------------------------------
// FFI Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use seamloop_core::backend::fake::FakeBackend;
    use std::time::Duration;

    /// Open a player on the fake backend and hand it out as an FFI handle.
    fn ffi_player() -> (Arc<FakeBackend>, *mut LoopHandle) {
        let backend = Arc::new(FakeBackend::new(100));
        let player = LoopPlayer::new(backend.clone(), Resource::from_path("/sounds/ffi.wav"))
            .expect("player");
        (backend, into_handle(player))
    }

    /// Read a *mut c_char into a String and free it.
    fn read_ffi_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null(), "FFI returned null string");
        let s = unsafe { CStr::from_ptr(ptr).to_str().unwrap().to_string() };
        unsafe { seamloop_string_free(ptr) };
        s
    }

    fn status(handle: *mut LoopHandle) -> serde_json::Value {
        serde_json::from_str(&read_ffi_string(seamloop_status(handle))).unwrap()
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[test]
    fn ffi_version() {
        assert_eq!(seamloop_version(), 1);
    }

    #[test]
    fn ffi_open_close_releases_handles() {
        let (backend, handle) = ffi_player();
        assert_eq!(backend.live().len(), 2);
        seamloop_close(handle);
        assert!(backend.live().is_empty());
    }

    #[test]
    fn ffi_close_null_is_noop() {
        seamloop_close(ptr::null_mut());
    }

    #[test]
    fn ffi_open_missing_file_returns_null() {
        let backend = Arc::new(FakeBackend::new(100));
        backend.mark_missing(&Resource::from_path("/nonexistent/seamloop/loop.wav"));

        clear_error();
        let handle = open_on(backend.clone(), "/nonexistent/seamloop/loop.wav", &PlayerConfig::default());
        assert!(handle.is_null());
        let msg = read_ffi_string(seamloop_last_error());
        assert!(msg.contains("not found"), "unexpected error: {}", msg);
        assert!(msg.contains("/nonexistent/seamloop/loop.wav"));
        assert!(backend.live().is_empty());
    }

    #[test]
    fn ffi_open_with_bad_config_returns_null() {
        let path = c("/nonexistent/seamloop/loop.wav");
        let config = c("{not json");
        let handle = unsafe { seamloop_open_with_config(path.as_ptr(), config.as_ptr()) };
        assert!(handle.is_null());
        let msg = read_ffi_string(seamloop_last_error());
        assert!(msg.contains("invalid config"));
    }

    #[test]
    fn ffi_open_null_path_returns_null() {
        let handle = unsafe { seamloop_open(ptr::null()) };
        assert!(handle.is_null());
        let msg = read_ffi_string(seamloop_last_error());
        assert!(msg.contains("null"));
    }

    #[test]
    fn ffi_null_handle_returns_error() {
        assert_eq!(seamloop_start(ptr::null_mut()), 0);
        let msg = read_ffi_string(seamloop_last_error());
        assert!(msg.contains("null"));

        assert!(seamloop_status(ptr::null_mut()).is_null());
    }

    // -------------------------------------------------------------------
    // Playback
    // -------------------------------------------------------------------

    #[test]
    fn ffi_start_pause() {
        let (backend, handle) = ffi_player();

        assert_eq!(seamloop_start(handle), 1);
        assert_eq!(status(handle)["playing"], true);
        assert_eq!(backend.playing().len(), 1);

        assert_eq!(seamloop_pause(handle), 1);
        assert_eq!(status(handle)["playing"], false);
        assert!(backend.playing().is_empty());

        seamloop_close(handle);
    }

    #[test]
    fn ffi_setters_update_status() {
        let (backend, handle) = ffi_player();

        assert_eq!(seamloop_set_volume(handle, 0.5), 1);
        assert_eq!(seamloop_set_speed(handle, 1.5), 1);
        assert_eq!(seamloop_set_speed_increment(handle, 0.25), 1);
        assert_eq!(seamloop_set_muted(handle, 1), 1);

        let s = status(handle);
        assert_eq!(s["volume"], 0.5);
        assert_eq!(s["speed"], 1.5);
        assert_eq!(s["speed_increment"], 0.25);
        assert_eq!(s["muted"], true);
        assert_eq!(s["resource"], "/sounds/ffi.wav");
        assert_eq!(backend.player(1).unwrap().volume, 0.0);

        seamloop_close(handle);
    }

    #[test]
    fn ffi_command_json() {
        let (backend, handle) = ffi_player();

        let start = c(r#"{"action":"start"}"#);
        assert_eq!(seamloop_command(handle, start.as_ptr()), 1);

        backend.advance(100);
        let player = player_ref(handle).unwrap();
        assert!(player.wait_for_loops(1, Duration::from_secs(5)));
        assert_eq!(status(handle)["loops"], 1);

        seamloop_close(handle);
    }

    #[test]
    fn ffi_command_invalid_json() {
        let (_backend, handle) = ffi_player();

        let bad = c(r#"{"action":"rewind"}"#);
        assert_eq!(seamloop_command(handle, bad.as_ptr()), 0);
        let msg = read_ffi_string(seamloop_last_error());
        assert!(!msg.is_empty());

        seamloop_close(handle);
    }

    #[test]
    fn ffi_commands_after_close_command_fail() {
        let (backend, handle) = ffi_player();

        let close = c(r#"{"action":"close"}"#);
        assert_eq!(seamloop_command(handle, close.as_ptr()), 1);
        assert!(backend.live().is_empty());

        assert_eq!(seamloop_start(handle), 0);
        let msg = read_ffi_string(seamloop_last_error());
        assert!(msg.contains("closed"));
        assert_eq!(status(handle)["closed"], true);

        seamloop_close(handle);
    }

    #[test]
    fn ffi_string_free_null_safe() {
        unsafe { seamloop_string_free(ptr::null_mut()) };
    }
}
