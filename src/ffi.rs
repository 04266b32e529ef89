//! FFI bindings for Spendlens
//!
//! This module provides C-compatible functions for calling Spendlens from host apps.
//! All functions take and return JSON as C strings (null-terminated). Returned strings
//! are allocated here and must be freed by the caller using `spendlens_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::adapter::TransactionAdapter;
use crate::aggregator::BehavioralContextAggregator;
use crate::clock::{Clock, FixedClock, SystemClock};
use crate::config::DetectionConfig;
use crate::encoder::AdvisoryEncoder;
use crate::error::DetectionError;
use crate::types::{ActiveBudget, BudgetContext, DetectorKind, Transaction};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a computed JSON string to the caller, or record the error and return NULL
fn into_c_result(result: Result<String, DetectionError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Options accepted as the optional `options_json` argument
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FfiOptions {
    config: Option<DetectionConfig>,
    months_back: Option<u32>,
    budgets: Vec<ActiveBudget>,
    /// Pins "today" for reproducible runs
    as_of: Option<NaiveDate>,
}

impl FfiOptions {
    unsafe fn from_ptr(options: *const c_char) -> Result<Self, DetectionError> {
        if options.is_null() {
            return Ok(Self::default());
        }
        match cstr_to_string(options) {
            Some(json) if json.trim().is_empty() => Ok(Self::default()),
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(DetectionError::ParseError(
                "Invalid options string pointer".to_string(),
            )),
        }
    }

    fn aggregator(self) -> Result<BehavioralContextAggregator, DetectionError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let clock: Arc<dyn Clock> = match self.as_of {
            Some(date) => Arc::new(FixedClock::on(date)),
            None => Arc::new(SystemClock),
        };

        let mut aggregator = BehavioralContextAggregator::with_clock(config, clock)
            .with_budgets(BudgetContext::new(self.budgets));
        if let Some(months_back) = self.months_back {
            DetectionConfig::validate_months_back(months_back)?;
            aggregator = aggregator.with_months_back(months_back);
        }
        Ok(aggregator)
    }
}

unsafe fn read_transactions(
    transactions_json: *const c_char,
) -> Result<Vec<Transaction>, DetectionError> {
    let json = cstr_to_string(transactions_json).ok_or_else(|| {
        DetectionError::ParseError("Invalid transactions string pointer".to_string())
    })?;
    TransactionAdapter::parse_array(&json)
}

unsafe fn behavioral_context_json(
    transactions_json: *const c_char,
    options_json: *const c_char,
) -> Result<String, DetectionError> {
    let transactions = read_transactions(transactions_json)?;
    let aggregator = FfiOptions::from_ptr(options_json)?.aggregator()?;
    let context = aggregator.analyze(&transactions);
    Ok(serde_json::to_string(&context)?)
}

unsafe fn advisory_context_json(
    transactions_json: *const c_char,
    options_json: *const c_char,
) -> Result<String, DetectionError> {
    let transactions = read_transactions(transactions_json)?;
    let aggregator = FfiOptions::from_ptr(options_json)?.aggregator()?;
    let context = aggregator.analyze(&transactions);
    AdvisoryEncoder::new().encode_to_json(&context)
}

unsafe fn detect_json(
    kind: DetectorKind,
    transactions_json: *const c_char,
    options_json: *const c_char,
) -> Result<String, DetectionError> {
    let transactions = read_transactions(transactions_json)?;
    let aggregator = FfiOptions::from_ptr(options_json)?.aggregator()?;
    let detector = aggregator
        .detector(kind)
        .ok_or_else(|| DetectionError::DetectorFailed {
            detector: kind.to_string(),
            reason: "not registered".to_string(),
        })?;
    let result = detector.detect(&transactions)?;
    Ok(serde_json::to_string(&result)?)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Run all detectors and return the behavioral context as JSON.
///
/// # Safety
/// - `transactions_json` must be a valid null-terminated C string holding a JSON array.
/// - `options_json` may be NULL or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `spendlens_free_string`.
/// - Returns NULL on error; call `spendlens_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn spendlens_behavioral_context(
    transactions_json: *const c_char,
    options_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    into_c_result(behavioral_context_json(transactions_json, options_json))
}

/// Run all detectors and return the sanitized advisory payload as JSON.
///
/// # Safety
/// - `transactions_json` must be a valid null-terminated C string holding a JSON array.
/// - `options_json` may be NULL or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `spendlens_free_string`.
/// - Returns NULL on error; call `spendlens_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn spendlens_advisory_context(
    transactions_json: *const c_char,
    options_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    into_c_result(advisory_context_json(transactions_json, options_json))
}

/// Run a single detector and return its `DetectionResult` as JSON.
///
/// # Safety
/// - `detector` must be a valid null-terminated C string naming a detector
///   (`small_recurring`, `stress_spending` or `end_of_month`).
/// - `transactions_json` must be a valid null-terminated C string holding a JSON array.
/// - `options_json` may be NULL or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `spendlens_free_string`.
/// - Returns NULL on error; call `spendlens_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn spendlens_detect(
    detector: *const c_char,
    transactions_json: *const c_char,
    options_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let kind = match cstr_to_string(detector).map(|s| s.parse::<DetectorKind>()) {
        Some(Ok(kind)) => kind,
        Some(Err(e)) => {
            set_last_error(&e);
            return ptr::null_mut();
        }
        None => {
            set_last_error("Invalid detector string pointer");
            return ptr::null_mut();
        }
    };

    into_c_result(detect_json(kind, transactions_json, options_json))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Spendlens functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Spendlens function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn spendlens_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Spendlens function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn spendlens_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Spendlens library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn spendlens_version() -> *const c_char {
    // Use a static byte string to avoid allocation
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn sample_transactions_json() -> CString {
        let records: Vec<String> = (1..=28)
            .map(|day| {
                format!(
                    r#"{{"id": "c{day}", "amount": -4.5, "merchant": "Blue Bottle", "category": "coffee", "date": "2024-03-{day:02}", "time": "08:10:00"}}"#
                )
            })
            .collect();
        CString::new(format!("[{}]", records.join(","))).unwrap()
    }

    fn options() -> CString {
        CString::new(r#"{"as_of": "2024-03-28", "months_back": 2}"#).unwrap()
    }

    #[test]
    fn test_ffi_behavioral_context() {
        let json = sample_transactions_json();
        let options = options();

        unsafe {
            let result = spendlens_behavioral_context(json.as_ptr(), options.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(value["small_recurring"]["status"], "available");
            assert_eq!(value["small_recurring"]["result"]["detected"], true);

            spendlens_free_string(result);
        }
    }

    #[test]
    fn test_ffi_null_options_use_defaults() {
        let json = CString::new("[]").unwrap();

        unsafe {
            let result = spendlens_behavioral_context(json.as_ptr(), ptr::null());
            assert!(!result.is_null());
            spendlens_free_string(result);
        }
    }

    #[test]
    fn test_ffi_advisory_context() {
        let json = sample_transactions_json();
        let options = options();

        unsafe {
            let result = spendlens_advisory_context(json.as_ptr(), options.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            assert!(result_str.contains("advisory_version"));
            assert!(!result_str.contains("Blue Bottle"));

            spendlens_free_string(result);
        }
    }

    #[test]
    fn test_ffi_detect_single() {
        let json = sample_transactions_json();
        let options = options();
        let detector = CString::new("small-recurring").unwrap();

        unsafe {
            let result = spendlens_detect(detector.as_ptr(), json.as_ptr(), options.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(value["metadata"]["transactions_analyzed"], 28);

            spendlens_free_string(result);
        }
    }

    #[test]
    fn test_ffi_unknown_detector() {
        let json = CString::new("[]").unwrap();
        let detector = CString::new("impulse").unwrap();

        unsafe {
            let result = spendlens_detect(detector.as_ptr(), json.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error_str = CStr::from_ptr(spendlens_last_error()).to_str().unwrap();
            assert!(error_str.contains("impulse"));
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid_json = CString::new("not json").unwrap();

            let result = spendlens_behavioral_context(invalid_json.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = spendlens_last_error();
            assert!(!error.is_null());

            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(!error_str.is_empty());
        }
    }

    #[test]
    fn test_ffi_invalid_config_is_reported() {
        let json = CString::new("[]").unwrap();
        let options = CString::new(r#"{"config": {"small_purchase_threshold": -1.0}}"#).unwrap();

        unsafe {
            let result = spendlens_behavioral_context(json.as_ptr(), options.as_ptr());
            assert!(result.is_null());

            let error_str = CStr::from_ptr(spendlens_last_error()).to_str().unwrap();
            assert!(error_str.contains("Invalid configuration"));
        }
    }

    #[test]
    fn test_ffi_months_back_beyond_limit_is_reported() {
        let json = CString::new("[]").unwrap();
        let options = CString::new(r#"{"months_back": 200000}"#).unwrap();

        unsafe {
            let result = spendlens_behavioral_context(json.as_ptr(), options.as_ptr());
            assert!(result.is_null());

            let error_str = CStr::from_ptr(spendlens_last_error()).to_str().unwrap();
            assert!(error_str.contains("months_back must be at most 120"));
        }
    }

    #[test]
    fn test_ffi_accepts_rfc3339_dates() {
        let json = CString::new(
            r#"[{"id": "a", "amount": -9.0, "date": "2024-03-20T23:30:00Z", "category": "takeout"}]"#,
        )
        .unwrap();
        let options = options();
        let detector = CString::new("stress-spending").unwrap();

        unsafe {
            let result = spendlens_detect(detector.as_ptr(), json.as_ptr(), options.as_ptr());
            assert!(!result.is_null());

            let result_str = CStr::from_ptr(result).to_str().unwrap();
            let value: serde_json::Value = serde_json::from_str(result_str).unwrap();
            assert_eq!(value["metadata"]["transactions_analyzed"], 1);

            spendlens_free_string(result);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = spendlens_version();
            assert!(!version.is_null());

            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
