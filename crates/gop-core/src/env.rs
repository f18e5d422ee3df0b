//! Environment variable helpers
//!
//! Configuration in this workspace is compile-time defaults overridden by
//! `GOP_*` environment variables. These helpers do the parsing; anything
//! unset or unparsable falls back to the default.
//!
//! ```ignore
//! use gop_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("GOP_NUM_WORKERS", 4);
//! let verbose = env_get_bool("GOP_VERBOSE", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or return `default`
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and valid
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Read `key` as a flag
///
/// "1", "true", "yes" and "on" (any case) are true, any other value is
/// false, and an unset variable yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Read `key` verbatim, or return `default`
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test owns its variable names so they can run in parallel.

    #[test]
    fn test_unset_returns_default() {
        let val: usize = env_get("__GOP_TEST_UNSET_A__", 42);
        assert_eq!(val, 42);
        assert!(env_get_opt::<u64>("__GOP_TEST_UNSET_A__").is_none());
        assert!(env_get_bool("__GOP_TEST_UNSET_A__", true));
        assert_eq!(env_get_str("__GOP_TEST_UNSET_A__", "pool"), "pool");
    }

    #[test]
    fn test_parse_with_whitespace() {
        std::env::set_var("__GOP_TEST_NUM__", " 12 ");
        let val: usize = env_get("__GOP_TEST_NUM__", 0);
        assert_eq!(val, 12);
        std::env::remove_var("__GOP_TEST_NUM__");
    }

    #[test]
    fn test_invalid_falls_back() {
        std::env::set_var("__GOP_TEST_BAD__", "many");
        let val: usize = env_get("__GOP_TEST_BAD__", 3);
        assert_eq!(val, 3);
        std::env::remove_var("__GOP_TEST_BAD__");
    }

    #[test]
    fn test_bool_variants() {
        for (raw, expected) in [("1", true), ("On", true), ("YES", true), ("0", false), ("nope", false)] {
            std::env::set_var("__GOP_TEST_FLAG__", raw);
            assert_eq!(env_get_bool("__GOP_TEST_FLAG__", !expected), expected, "value {raw}");
        }
        std::env::remove_var("__GOP_TEST_FLAG__");
    }
}
