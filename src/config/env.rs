// SPDX-License-Identifier: Apache-2.0

//! Typed environment-variable readers (spec §4.H). Each reader has a
//! default and, for numeric values, an exclusive upper bound; malformed or
//! out-of-range values fall back to the default with a logged warning
//! rather than aborting, mirroring the original `getenv_bool`/
//! `getenv_uint64`/`getenv_str` helpers.

use std::env;

pub fn bool_var(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => v == "1" || v.eq_ignore_ascii_case("true"),
        Err(_) => default,
    }
}

/// Reads a `u64` in `[0, max)`. Values `>= max`, or values that fail to
/// parse, are rejected in favor of `default`.
pub fn u64_var(name: &str, default: u64, max: u64) -> u64 {
    match env::var(name) {
        Ok(v) => match v.parse::<u64>() {
            Ok(n) if n < max => n,
            Ok(n) => {
                log::warn!(
                    "[ Launcher ] {} value {} is out of range (must be < {}), using default {}",
                    name,
                    n,
                    max,
                    default
                );
                default
            }
            Err(_) => {
                log::warn!(
                    "[ Launcher ] {} value {:?} is not a valid number, using default {}",
                    name,
                    v,
                    default
                );
                default
            }
        },
        Err(_) => default,
    }
}

pub fn str_var(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

pub fn opt_str_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Prints a warning for any `SGXLKL_TRACE_*`/`SGXLKL_PRINT_*`-style debug
/// variable set in a non-debug build, matching the original launcher's
/// `check_debug_envs` (SPEC_FULL §3: supplemented debug surface).
pub fn warn_ignored_debug_vars(prefixes: &[&str]) {
    for (key, _) in env::vars() {
        if prefixes.iter().any(|p| key.starts_with(p)) && bool_var(&key, false) {
            log::warn!("[ Launcher ] {} ignored in non-debug build", key);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn bool_defaults_and_parses() {
        env::remove_var("TEST_BOOL_VAR");
        assert!(!bool_var("TEST_BOOL_VAR", false));
        env::set_var("TEST_BOOL_VAR", "1");
        assert!(bool_var("TEST_BOOL_VAR", false));
        env::remove_var("TEST_BOOL_VAR");
    }

    #[test]
    #[serial]
    fn u64_rejects_out_of_range() {
        env::set_var("TEST_U64_VAR", "1000000");
        assert_eq!(u64_var("TEST_U64_VAR", 5, 1024), 5);
        env::set_var("TEST_U64_VAR", "512");
        assert_eq!(u64_var("TEST_U64_VAR", 5, 1024), 512);
        env::remove_var("TEST_U64_VAR");
    }

    #[test]
    #[serial]
    fn u64_rejects_garbage() {
        env::set_var("TEST_U64_VAR2", "banana");
        assert_eq!(u64_var("TEST_U64_VAR2", 7, 1024), 7);
        env::remove_var("TEST_U64_VAR2");
    }
}
