//! C-ABI wrapper around `netbridge-core`.
//!
//! # Overview
//! Lets a script runtime written against a C ABI issue non-blocking HTTP
//! requests. The runtime identifies each suspended task with a `u64`,
//! submits it through `nb_fetch`/`nb_get`/`nb_post`, and calls `nb_pump`
//! once per scheduler tick; the pump invokes a resume callback for every
//! completed request.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Admissions are returned as an `FfiAdmission` envelope the caller frees
//!   with `nb_free_admission`; resume results are only borrowed by the
//!   callback and are freed by the library.
//! - Options are passed as a JSON object string, the same shape scripts
//!   use, instead of a C struct.
//! - All functions must be called from the scheduler's thread. Callbacks
//!   run with no borrow of the bridge held, so they may submit requests or
//!   shut the bridge down.

pub mod types;

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;
use std::sync::Arc;

use netbridge_core::{BridgeConfig, ConnectivityFlag, FetchOptions, NetBridge, PumpReport, TaskHost};
use tracing::warn;

use types::*;

// ---------------------------------------------------------------------------
// Bridge lifecycle
// ---------------------------------------------------------------------------

/// Create a bridge. `config_json` may be null for the defaults; otherwise it
/// is a JSON object whose keys override individual defaults.
///
/// The link starts out connected. Returns null if the configuration is
/// invalid. Free with `nb_bridge_free`.
#[unsafe(no_mangle)]
pub extern "C" fn nb_bridge_new(config_json: *const c_char) -> *mut FfiBridge {
    catch_unwind(|| {
        let config = if config_json.is_null() {
            BridgeConfig::default()
        } else {
            let Ok(raw) = unsafe { CStr::from_ptr(config_json) }.to_str() else {
                warn!("bridge config is not valid UTF-8");
                return std::ptr::null_mut();
            };
            match BridgeConfig::from_json(raw) {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "rejecting bridge config");
                    return std::ptr::null_mut();
                }
            }
        };
        let link = ConnectivityFlag::new(true);
        match NetBridge::with_ureq(config, Arc::new(link.clone())) {
            Ok(inner) => Box::into_raw(Box::new(FfiBridge { inner, link })),
            Err(e) => {
                warn!(error = %e, "rejecting bridge config");
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free a bridge created by `nb_bridge_new`. Tasks still suspended are
/// dropped without being resumed; call `nb_shutdown` first to collect them.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn nb_bridge_free(bridge: *mut FfiBridge) {
    if !bridge.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(bridge) });
        }));
    }
}

/// Start the worker ahead of the first request. Idempotent.
#[unsafe(no_mangle)]
pub extern "C" fn nb_init(bridge: *mut FfiBridge) -> FfiErrorCode {
    catch_unwind(AssertUnwindSafe(|| {
        if bridge.is_null() {
            return FfiErrorCode::NullArg;
        }
        let bridge = unsafe { &mut *bridge };
        match bridge.inner.init() {
            Ok(()) => FfiErrorCode::Ok,
            Err(e) => FfiErrorCode::from(&e),
        }
    }))
    .unwrap_or(FfiErrorCode::Panic)
}

/// Report the network link going up or down.
#[unsafe(no_mangle)]
pub extern "C" fn nb_set_connected(bridge: *mut FfiBridge, connected: bool) {
    if bridge.is_null() {
        return;
    }
    let _ = catch_unwind(AssertUnwindSafe(|| {
        let bridge = unsafe { &*bridge };
        bridge.link.set(connected);
    }));
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Read a required C string argument.
///
/// # Safety
/// `s` must be null or point to a NUL-terminated string.
unsafe fn required_str<'a>(s: *const c_char, name: &str) -> Result<&'a str, *mut FfiAdmission> {
    if s.is_null() {
        return Err(FfiAdmission::null_arg(name));
    }
    unsafe { CStr::from_ptr(s) }
        .to_str()
        .map_err(|_| FfiAdmission::invalid_utf8(name))
}

/// Start a request for `task`. `options_json` may be null for a plain GET;
/// otherwise it is an object with any of `method`, `headers`, `body`,
/// `timeout` and `follow_redirects`.
///
/// Free the returned admission with `nb_free_admission`.
#[unsafe(no_mangle)]
pub extern "C" fn nb_fetch(
    bridge: *mut FfiBridge,
    task: u64,
    url: *const c_char,
    options_json: *const c_char,
) -> *mut FfiAdmission {
    catch_unwind(AssertUnwindSafe(|| {
        if bridge.is_null() {
            return FfiAdmission::null_arg("bridge");
        }
        let bridge = unsafe { &mut *bridge };
        let url = match unsafe { required_str(url, "url") } {
            Ok(u) => u,
            Err(rejected) => return rejected,
        };
        let options = if options_json.is_null() {
            FetchOptions::new()
        } else {
            let raw = match unsafe { required_str(options_json, "options") } {
                Ok(r) => r,
                Err(rejected) => return rejected,
            };
            match FetchOptions::from_json(raw) {
                Ok(o) => o,
                Err(e) => return FfiAdmission::error(FfiErrorCode::from(&e), &e.to_string()),
            }
        };
        FfiAdmission::from_core(bridge.inner.fetch(task, url, options))
    }))
    .unwrap_or_else(|_| FfiAdmission::panic("panic in nb_fetch"))
}

/// `nb_fetch` with default options.
#[unsafe(no_mangle)]
pub extern "C" fn nb_get(bridge: *mut FfiBridge, task: u64, url: *const c_char) -> *mut FfiAdmission {
    nb_fetch(bridge, task, url, std::ptr::null())
}

/// POST `body_len` bytes from `body`. `body` may be null when `body_len` is
/// zero. A null `content_type` means `application/x-www-form-urlencoded`.
#[unsafe(no_mangle)]
pub extern "C" fn nb_post(
    bridge: *mut FfiBridge,
    task: u64,
    url: *const c_char,
    body: *const u8,
    body_len: usize,
    content_type: *const c_char,
) -> *mut FfiAdmission {
    catch_unwind(AssertUnwindSafe(|| {
        if bridge.is_null() {
            return FfiAdmission::null_arg("bridge");
        }
        if body.is_null() && body_len > 0 {
            return FfiAdmission::null_arg("body");
        }
        let bridge = unsafe { &mut *bridge };
        let url = match unsafe { required_str(url, "url") } {
            Ok(u) => u,
            Err(rejected) => return rejected,
        };
        let content_type = if content_type.is_null() {
            None
        } else {
            match unsafe { required_str(content_type, "content_type") } {
                Ok(c) => Some(c),
                Err(rejected) => return rejected,
            }
        };
        let body = if body_len == 0 {
            Vec::new()
        } else {
            unsafe { slice::from_raw_parts(body, body_len) }.to_vec()
        };
        FfiAdmission::from_core(bridge.inner.post(task, url, body, content_type))
    }))
    .unwrap_or_else(|_| FfiAdmission::panic("panic in nb_post"))
}

// ---------------------------------------------------------------------------
// Pump and shutdown
// ---------------------------------------------------------------------------

/// Resume every task whose response is ready, without blocking.
///
/// `resume` is invoked once per completed request with the caller's
/// `user_data`. The result pointer is only valid during the call. The
/// callback may call `nb_fetch`, `nb_get`, `nb_post` or `nb_shutdown` on the
/// same bridge; it must not call `nb_bridge_free`.
#[unsafe(no_mangle)]
pub extern "C" fn nb_pump(
    bridge: *mut FfiBridge,
    resume: Option<NbResumeCallback>,
    user_data: *mut c_void,
) -> FfiPumpReport {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(callback) = resume else {
            return FfiPumpReport::default();
        };
        if bridge.is_null() {
            return FfiPumpReport::default();
        }
        let ready = {
            let bridge = unsafe { &mut *bridge };
            bridge.inner.take_ready()
        };

        // No reference into the bridge is live past this point.
        let mut report = PumpReport {
            orphaned: ready.orphaned,
            ..PumpReport::default()
        };
        let mut host = CallbackHost { callback, user_data };
        for (task, result) in ready.results {
            if let Err(e) = host.resume(task, result) {
                warn!(task, error = %e, "task raised after resume");
                report.resume_failures += 1;
            }
            report.delivered += 1;
        }
        FfiPumpReport::from(report)
    }))
    .unwrap_or_default()
}

/// Stop the worker and hand back every task still waiting. `abandoned` may
/// be null. Returns the number of abandoned tasks. Safe to call repeatedly,
/// including from inside an `nb_pump` callback.
#[unsafe(no_mangle)]
pub extern "C" fn nb_shutdown(
    bridge: *mut FfiBridge,
    abandoned: Option<NbAbandonedCallback>,
    user_data: *mut c_void,
) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if bridge.is_null() {
            return 0;
        }
        let tasks = {
            let bridge = unsafe { &mut *bridge };
            bridge.inner.shutdown()
        };
        if let Some(callback) = abandoned {
            for &task in &tasks {
                callback(user_data, task);
            }
        }
        count_u32(tasks.len())
    }))
    .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free an `FfiAdmission` returned by a request function. Safe to call with
/// null.
#[unsafe(no_mangle)]
pub extern "C" fn nb_free_admission(admission: *mut FfiAdmission) {
    if admission.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let admission = unsafe { Box::from_raw(admission) };
        unsafe {
            drop_c_string(admission.error_message);
            drop_c_string(admission.handle);
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn nb_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| unsafe { drop_c_string(s) });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn new_bridge() -> *mut FfiBridge {
        let bridge = nb_bridge_new(std::ptr::null());
        assert!(!bridge.is_null());
        bridge
    }

    fn message(admission: *mut FfiAdmission) -> String {
        let adm = unsafe { &*admission };
        assert!(!adm.error_message.is_null());
        unsafe { CStr::from_ptr(adm.error_message) }
            .to_str()
            .unwrap()
            .to_string()
    }

    extern "C" fn never_called(_: *mut c_void, _: u64, _: *const FfiFetchResult) -> bool {
        panic!("no result expected");
    }

    extern "C" fn collect_abandoned(user_data: *mut c_void, task: u64) {
        let tasks = unsafe { &mut *(user_data as *mut Vec<u64>) };
        tasks.push(task);
    }

    #[test]
    fn bridge_new_and_free() {
        let bridge = new_bridge();
        nb_bridge_free(bridge);
    }

    #[test]
    fn bridge_new_accepts_partial_config() {
        let config = CString::new(r#"{"max_response_body": 4096}"#).unwrap();
        let bridge = nb_bridge_new(config.as_ptr());
        assert!(!bridge.is_null());
        assert_eq!(unsafe { &*bridge }.inner.config().max_response_body, 4096);
        nb_bridge_free(bridge);
    }

    #[test]
    fn bridge_new_rejects_invalid_config() {
        let config = CString::new(r#"{"request_queue_capacity": 0}"#).unwrap();
        assert!(nb_bridge_new(config.as_ptr()).is_null());
        let garbage = CString::new("not json").unwrap();
        assert!(nb_bridge_new(garbage.as_ptr()).is_null());
    }

    #[test]
    fn bridge_free_null_is_safe() {
        nb_bridge_free(std::ptr::null_mut());
    }

    #[test]
    fn init_twice_is_ok() {
        let bridge = new_bridge();
        assert_eq!(nb_init(bridge), FfiErrorCode::Ok);
        assert_eq!(nb_init(bridge), FfiErrorCode::Ok);
        assert_eq!(nb_init(std::ptr::null_mut()), FfiErrorCode::NullArg);
        nb_bridge_free(bridge);
    }

    #[test]
    fn fetch_null_arguments_are_reported() {
        let bridge = new_bridge();
        let url = CString::new("http://device.local/").unwrap();

        let adm = nb_get(std::ptr::null_mut(), 1, url.as_ptr());
        assert_eq!(unsafe { &*adm }.error_code, FfiErrorCode::NullArg);
        assert_eq!(message(adm), "null argument: bridge");
        nb_free_admission(adm);

        let adm = nb_get(bridge, 1, std::ptr::null());
        assert_eq!(unsafe { &*adm }.error_code, FfiErrorCode::NullArg);
        assert!(unsafe { &*adm }.handle.is_null());
        nb_free_admission(adm);

        nb_bridge_free(bridge);
    }

    #[test]
    fn fetch_long_url_is_rejected_with_message() {
        let bridge = new_bridge();
        let url = CString::new(format!("http://device.local/{}", "x".repeat(600))).unwrap();

        let adm = nb_get(bridge, 1, url.as_ptr());

        assert_eq!(unsafe { &*adm }.error_code, FfiErrorCode::UrlTooLong);
        assert_eq!(message(adm), "URL too long");
        nb_free_admission(adm);
        nb_bridge_free(bridge);
    }

    #[test]
    fn fetch_with_bad_options_is_rejected() {
        let bridge = new_bridge();
        let url = CString::new("http://device.local/").unwrap();
        let options = CString::new(r#"{"method": "TELEPORT"}"#).unwrap();

        let adm = nb_fetch(bridge, 1, url.as_ptr(), options.as_ptr());
        assert_eq!(unsafe { &*adm }.error_code, FfiErrorCode::InvalidOption);
        nb_free_admission(adm);

        let malformed = CString::new("{").unwrap();
        let adm = nb_fetch(bridge, 2, url.as_ptr(), malformed.as_ptr());
        assert_eq!(unsafe { &*adm }.error_code, FfiErrorCode::InvalidOption);
        nb_free_admission(adm);

        nb_bridge_free(bridge);
    }

    #[test]
    fn link_down_rejects_requests() {
        let bridge = new_bridge();
        let url = CString::new("http://device.local/").unwrap();
        nb_set_connected(bridge, false);

        let adm = nb_get(bridge, 1, url.as_ptr());

        assert_eq!(unsafe { &*adm }.error_code, FfiErrorCode::NotConnected);
        assert_eq!(message(adm), "WiFi not connected");
        nb_free_admission(adm);
        nb_bridge_free(bridge);
    }

    #[test]
    fn post_rejects_null_body_with_length() {
        let bridge = new_bridge();
        let url = CString::new("http://device.local/").unwrap();

        let adm = nb_post(bridge, 1, url.as_ptr(), std::ptr::null(), 4, std::ptr::null());

        assert_eq!(unsafe { &*adm }.error_code, FfiErrorCode::NullArg);
        nb_free_admission(adm);
        nb_bridge_free(bridge);
    }

    #[test]
    fn post_rejects_oversized_body() {
        let bridge = new_bridge();
        let url = CString::new("http://device.local/").unwrap();
        let body = vec![0u8; 40 * 1024];

        let adm = nb_post(bridge, 1, url.as_ptr(), body.as_ptr(), body.len(), std::ptr::null());

        assert_eq!(unsafe { &*adm }.error_code, FfiErrorCode::BodyTooLarge);
        nb_free_admission(adm);
        nb_bridge_free(bridge);
    }

    #[test]
    fn pump_without_requests_delivers_nothing() {
        let bridge = new_bridge();
        let report = nb_pump(bridge, Some(never_called), std::ptr::null_mut());
        assert_eq!(report, FfiPumpReport::default());
        assert_eq!(
            nb_pump(std::ptr::null_mut(), Some(never_called), std::ptr::null_mut()),
            FfiPumpReport::default()
        );
        nb_bridge_free(bridge);
    }

    #[test]
    fn shutdown_on_idle_bridge_returns_nothing() {
        let bridge = new_bridge();
        let mut abandoned: Vec<u64> = Vec::new();
        let count = nb_shutdown(
            bridge,
            Some(collect_abandoned),
            &mut abandoned as *mut Vec<u64> as *mut c_void,
        );
        assert_eq!(count, 0);
        assert!(abandoned.is_empty());
        assert_eq!(nb_shutdown(bridge, None, std::ptr::null_mut()), 0);
        assert_eq!(nb_shutdown(std::ptr::null_mut(), None, std::ptr::null_mut()), 0);
        nb_bridge_free(bridge);
    }

    #[test]
    fn free_functions_accept_null() {
        nb_free_admission(std::ptr::null_mut());
        nb_free_string(std::ptr::null_mut());
    }

    #[test]
    fn error_result_carries_code_message_and_json() {
        let result = netbridge_core::FetchResult::from(netbridge_core::FetchError::QueueFull);
        let ffi = FfiFetchResult::from_core(&result);

        assert_eq!(ffi.error_code, FfiErrorCode::QueueFull);
        assert!(ffi.body.is_null());
        let json = unsafe { CStr::from_ptr(ffi.json) }.to_str().unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"], "Request queue full");
        ffi.release();
    }

    #[test]
    fn success_result_exposes_body_and_headers() {
        let result = netbridge_core::FetchResult::Ok(netbridge_core::FetchResponse {
            status: 201,
            body: b"created".to_vec(),
            headers: vec![("Location".into(), "/items/7".into())],
            truncated: false,
        });
        let ffi = FfiFetchResult::from_core(&result);

        assert_eq!(ffi.error_code, FfiErrorCode::Ok);
        assert_eq!(ffi.status, 201);
        let body = unsafe { slice::from_raw_parts(ffi.body, ffi.body_len) };
        assert_eq!(body, b"created");
        assert_eq!(ffi.headers_len, 1);
        let header = unsafe { &*ffi.headers };
        assert_eq!(unsafe { CStr::from_ptr(header.key) }.to_str().unwrap(), "Location");
        assert_eq!(unsafe { CStr::from_ptr(header.value) }.to_str().unwrap(), "/items/7");
        ffi.release();
    }

    #[test]
    fn link_lost_in_flight_reports_not_connected() {
        let result = netbridge_core::FetchResult::from(netbridge_core::FetchError::LinkLost);
        let ffi = FfiFetchResult::from_core(&result);
        assert_eq!(ffi.error_code, FfiErrorCode::NotConnected);
        let message = unsafe { CStr::from_ptr(ffi.error_message) }.to_str().unwrap();
        assert_eq!(message, "WiFi not connected");
        ffi.release();
    }

    #[test]
    fn interior_nul_is_replaced_not_blanked() {
        let s = c_string("a\0b");
        assert_eq!(unsafe { CStr::from_ptr(s) }.to_str().unwrap(), "a?b");
        unsafe { drop_c_string(s) };
    }

    #[test]
    fn header_with_nul_survives_into_result() {
        let result = netbridge_core::FetchResult::Ok(netbridge_core::FetchResponse {
            status: 200,
            body: Vec::new(),
            headers: vec![("X-Tag".into(), "v1\0v2".into())],
            truncated: false,
        });
        let ffi = FfiFetchResult::from_core(&result);
        let header = unsafe { &*ffi.headers };
        assert_eq!(unsafe { CStr::from_ptr(header.value) }.to_str().unwrap(), "v1?v2");
        ffi.release();
    }

    #[test]
    fn counts_saturate_at_u32_max() {
        assert_eq!(count_u32(7), 7);
        assert_eq!(count_u32(u32::MAX as usize), u32::MAX);
        #[cfg(target_pointer_width = "64")]
        {
            let report = FfiPumpReport::from(PumpReport {
                delivered: u32::MAX as usize + 5,
                orphaned: 1,
                resume_failures: 0,
            });
            assert_eq!(report.delivered, u32::MAX);
            assert_eq!(report.orphaned, 1);
        }
    }
}
