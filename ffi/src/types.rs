//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Each type mirrors a core type with C-compatible fields: `*mut c_char`
//! for strings, pointer plus length for bytes and header arrays, and enums
//! with explicit discriminants. Conversions live here so `lib.rs` stays
//! focused on the `extern "C"` surface.

use std::ffi::{c_void, CString};
use std::fmt;
use std::os::raw::c_char;
use std::ptr;

use netbridge_core::{Admission, ConnectivityFlag, FetchError, FetchResult, NetBridge, PumpReport, TaskHost};

/// Opaque handle to a bridge. C callers receive a pointer to this and pass
/// it back into every FFI function. Tasks are identified by a caller-chosen
/// `u64`.
pub struct FfiBridge {
    pub(crate) inner: NetBridge<u64>,
    pub(crate) link: ConnectivityFlag,
}

/// Error codes carried by admissions and results.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiErrorCode {
    Ok = 0,
    UrlTooLong = 1,
    InvalidUrl = 2,
    InvalidOption = 3,
    BodyTooLarge = 4,
    QueueFull = 5,
    NotConnected = 6,
    NotInitialized = 7,
    Http = 8,
    WorkerStopped = 9,
    InvalidUtf8 = 10,
    NullArg = 11,
    Panic = 12,
}

impl From<&FetchError> for FfiErrorCode {
    fn from(err: &FetchError) -> Self {
        match err {
            FetchError::UrlTooLong => FfiErrorCode::UrlTooLong,
            FetchError::InvalidUrl(_) => FfiErrorCode::InvalidUrl,
            FetchError::InvalidOption { .. } => FfiErrorCode::InvalidOption,
            FetchError::BodyTooLarge { .. } => FfiErrorCode::BodyTooLarge,
            FetchError::QueueFull => FfiErrorCode::QueueFull,
            FetchError::NotConnected | FetchError::LinkLost => FfiErrorCode::NotConnected,
            FetchError::NotInitialized => FfiErrorCode::NotInitialized,
            FetchError::Exchange(_) => FfiErrorCode::Http,
            FetchError::WorkerStopped => FfiErrorCode::WorkerStopped,
        }
    }
}

/// Interior NULs become `?` so the rest of the text survives.
pub(crate) fn c_string(s: impl Into<Vec<u8>>) -> *mut c_char {
    let mut bytes = s.into();
    for b in bytes.iter_mut().filter(|b| **b == 0) {
        *b = b'?';
    }
    CString::new(bytes).unwrap_or_default().into_raw()
}

/// Counts cross the boundary as `u32`, saturating rather than wrapping.
pub(crate) fn count_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// # Safety
/// `s` must be null or come from `c_string`.
pub(crate) unsafe fn drop_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Outcome of `nb_fetch` and friends.
///
/// On admission `error_code` is `Ok`, `error_message` is null and `handle`
/// names the continuation; the task must now wait for `nb_pump`. On
/// rejection `handle` is null and the task should continue immediately
/// with the error.
#[repr(C)]
pub struct FfiAdmission {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub handle: *mut c_char,
}

impl FfiAdmission {
    pub(crate) fn from_core(admission: Admission<u64>) -> *mut Self {
        let admission = match admission {
            Admission::Suspended(handle) => FfiAdmission {
                error_code: FfiErrorCode::Ok,
                error_message: ptr::null_mut(),
                handle: c_string(handle.to_string()),
            },
            Admission::Rejected { error, .. } => FfiAdmission {
                error_code: FfiErrorCode::from(&error),
                error_message: c_string(error.to_string()),
                handle: ptr::null_mut(),
            },
        };
        Box::into_raw(Box::new(admission))
    }

    pub(crate) fn error(error_code: FfiErrorCode, msg: &str) -> *mut Self {
        Box::into_raw(Box::new(FfiAdmission {
            error_code,
            error_message: c_string(msg),
            handle: ptr::null_mut(),
        }))
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::NullArg, &format!("null argument: {name}"))
    }

    pub(crate) fn invalid_utf8(name: &str) -> *mut Self {
        Self::error(FfiErrorCode::InvalidUtf8, &format!("{name} is not valid UTF-8"))
    }

    pub(crate) fn panic(msg: &str) -> *mut Self {
        Self::error(FfiErrorCode::Panic, msg)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A single kept response header.
#[repr(C)]
pub struct FfiHeader {
    pub key: *mut c_char,
    pub value: *mut c_char,
}

/// The result a task is resumed with.
///
/// Borrowed by the resume callback for the duration of the call only; the
/// library frees it once the callback returns. `json` always holds the
/// script-facing form (`{"ok": true, ...}` or `{"ok": false, "error": ...}`).
#[repr(C)]
pub struct FfiFetchResult {
    pub error_code: FfiErrorCode,
    pub error_message: *mut c_char,
    pub status: u16,
    pub body: *mut u8,
    pub body_len: usize,
    pub headers: *mut FfiHeader,
    pub headers_len: u32,
    pub truncated: bool,
    pub json: *mut c_char,
}

impl FfiFetchResult {
    pub(crate) fn from_core(result: &FetchResult) -> Self {
        let json = c_string(result.to_json().to_string());
        match result {
            FetchResult::Ok(response) => {
                let (body, body_len) = raw_bytes(response.body.clone());
                let headers_len = count_u32(response.headers.len());
                let headers = if response.headers.is_empty() {
                    ptr::null_mut()
                } else {
                    let ffi_headers: Box<[FfiHeader]> = response
                        .headers
                        .iter()
                        .map(|(k, v)| FfiHeader {
                            key: c_string(k.as_str()),
                            value: c_string(v.as_str()),
                        })
                        .collect();
                    Box::into_raw(ffi_headers) as *mut FfiHeader
                };
                FfiFetchResult {
                    error_code: FfiErrorCode::Ok,
                    error_message: ptr::null_mut(),
                    status: response.status,
                    body,
                    body_len,
                    headers,
                    headers_len,
                    truncated: response.truncated,
                    json,
                }
            }
            FetchResult::Err(error) => FfiFetchResult {
                error_code: FfiErrorCode::from(error),
                error_message: c_string(error.to_string()),
                status: 0,
                body: ptr::null_mut(),
                body_len: 0,
                headers: ptr::null_mut(),
                headers_len: 0,
                truncated: false,
                json,
            },
        }
    }

    /// Free every allocation made by `from_core`.
    pub(crate) fn release(self) {
        unsafe {
            drop_c_string(self.error_message);
            drop_c_string(self.json);
            if !self.body.is_null() {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(self.body, self.body_len)));
            }
            if !self.headers.is_null() {
                let headers = Box::from_raw(ptr::slice_from_raw_parts_mut(
                    self.headers,
                    self.headers_len as usize,
                ));
                for h in headers.iter() {
                    drop_c_string(h.key);
                    drop_c_string(h.value);
                }
            }
        }
    }
}

fn raw_bytes(bytes: Vec<u8>) -> (*mut u8, usize) {
    if bytes.is_empty() {
        return (ptr::null_mut(), 0);
    }
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len();
    (Box::into_raw(boxed) as *mut u8, len)
}

/// Counts from one `nb_pump` call.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FfiPumpReport {
    pub delivered: u32,
    pub orphaned: u32,
    pub resume_failures: u32,
}

impl From<PumpReport> for FfiPumpReport {
    fn from(r: PumpReport) -> Self {
        FfiPumpReport {
            delivered: count_u32(r.delivered),
            orphaned: count_u32(r.orphaned),
            resume_failures: count_u32(r.resume_failures),
        }
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Resumes task `task` with `result`. Return `false` if the task raised.
pub type NbResumeCallback =
    extern "C" fn(user_data: *mut c_void, task: u64, result: *const FfiFetchResult) -> bool;

/// Receives a task abandoned by `nb_shutdown`.
pub type NbAbandonedCallback = extern "C" fn(user_data: *mut c_void, task: u64);

pub(crate) struct CallbackHost {
    pub(crate) callback: NbResumeCallback,
    pub(crate) user_data: *mut c_void,
}

#[derive(Debug)]
pub(crate) struct TaskRaised;

impl fmt::Display for TaskRaised {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("resume callback reported failure")
    }
}

impl TaskHost<u64> for CallbackHost {
    type Error = TaskRaised;

    fn resume(&mut self, task: u64, result: FetchResult) -> Result<(), TaskRaised> {
        let ffi = FfiFetchResult::from_core(&result);
        let ok = (self.callback)(self.user_data, task, &ffi);
        ffi.release();
        if ok {
            Ok(())
        } else {
            Err(TaskRaised)
        }
    }
}
