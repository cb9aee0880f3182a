//! Environment variable helpers
//!
//! Used by `SessionConfig::from_env()` and `LineConfig::from_env()`.
//!
//! ```ignore
//! use bulkstream_core::env::{env_get, env_get_bool};
//!
//! let timeout: u64 = env_get("BULKSTREAM_TIMEOUT_SECS", 10);
//! let flush = env_get_bool("BULKSTREAM_LOG_FLUSH", false);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Any other value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `Some(T)` if the variable is set and parses, `None` otherwise
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Raw string value, if set and non-empty
#[inline]
pub fn env_get_raw(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let val: u64 = env_get("__BULKSTREAM_UNSET_12345__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__BULKSTREAM_UNSET_12345__", true));
        assert_eq!(env_get_opt::<u32>("__BULKSTREAM_UNSET_12345__"), None);
        assert_eq!(env_get_raw("__BULKSTREAM_UNSET_12345__"), None);
    }

    #[test]
    fn test_parse_set_value() {
        std::env::set_var("__BULKSTREAM_TEST_NUM__", " 17 ");
        let val: u32 = env_get("__BULKSTREAM_TEST_NUM__", 0);
        assert_eq!(val, 17);

        std::env::set_var("__BULKSTREAM_TEST_BOOL__", "Yes");
        assert!(env_get_bool("__BULKSTREAM_TEST_BOOL__", false));
        std::env::set_var("__BULKSTREAM_TEST_BOOL__", "nope");
        assert!(!env_get_bool("__BULKSTREAM_TEST_BOOL__", true));
    }
}
