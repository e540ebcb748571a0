//! Typed accessors over a group's raw string parameters and a remote
//! config's raw byte value, so callers don't have to parse either by hand.

use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Typed access over a group's `params` map.
pub trait ParamsExt {
    /// The raw string value for `key`, if present.
    fn as_str(&self, key: &str) -> Option<&str>;
    /// `as_str`, falling back to `default` when absent.
    fn as_str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.as_str(key).unwrap_or(default)
    }
    /// Parse the value for `key` as an `i64`.
    fn as_i64(&self, key: &str) -> Option<i64>;
    /// `as_i64`, falling back to `default` when absent or unparsable.
    fn as_i64_or(&self, key: &str, default: i64) -> i64 {
        self.as_i64(key).unwrap_or(default)
    }
    /// Parse the value for `key` as an `f64`.
    fn as_f64(&self, key: &str) -> Option<f64>;
    /// `as_f64`, falling back to `default` when absent or unparsable.
    fn as_f64_or(&self, key: &str, default: f64) -> f64 {
        self.as_f64(key).unwrap_or(default)
    }
    /// Parse the value for `key` as a `bool` (`"true"`/`"false"`, case-insensitive).
    fn as_bool(&self, key: &str) -> Option<bool>;
    /// `as_bool`, falling back to `default` when absent or unparsable.
    fn as_bool_or(&self, key: &str, default: bool) -> bool {
        self.as_bool(key).unwrap_or(default)
    }
    /// Deserialize the value for `key` as JSON into `T`.
    fn as_json<T: DeserializeOwned>(&self, key: &str) -> Option<T>;
}

impl ParamsExt for HashMap<String, String> {
    fn as_str(&self, key: &str) -> Option<&str> {
        self.get(key).map(|s| s.as_str())
    }

    fn as_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    fn as_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    fn as_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.to_ascii_lowercase().parse().ok())
    }

    fn as_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_str(v).ok())
    }
}

/// Typed access over a remote-config's raw byte value.
pub trait ConfigValueExt {
    /// Interpret the value as UTF-8.
    fn as_str(&self) -> Option<&str>;
    /// `as_str`, falling back to `default` when invalid UTF-8.
    fn as_str_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.as_str().unwrap_or(default)
    }
    /// Interpret the value as UTF-8 then parse as an `i64`.
    fn as_i64(&self) -> Option<i64>;
    /// `as_i64`, falling back to `default` when absent or unparsable.
    fn as_i64_or(&self, default: i64) -> i64 {
        self.as_i64().unwrap_or(default)
    }
    /// Interpret the value as UTF-8 then parse as an `f64`.
    fn as_f64(&self) -> Option<f64>;
    /// `as_f64`, falling back to `default` when absent or unparsable.
    fn as_f64_or(&self, default: f64) -> f64 {
        self.as_f64().unwrap_or(default)
    }
    /// Interpret the value as UTF-8 then parse as a `bool`.
    fn as_bool(&self) -> Option<bool>;
    /// `as_bool`, falling back to `default` when absent or unparsable.
    fn as_bool_or(&self, default: bool) -> bool {
        self.as_bool().unwrap_or(default)
    }
    /// Deserialize the value as JSON into `T`.
    fn as_json<T: DeserializeOwned>(&self) -> Option<T>;
}

impl ConfigValueExt for [u8] {
    fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self).ok()
    }

    fn as_i64(&self) -> Option<i64> {
        ConfigValueExt::as_str(self).and_then(|s| s.parse().ok())
    }

    fn as_f64(&self) -> Option<f64> {
        ConfigValueExt::as_str(self).and_then(|s| s.parse().ok())
    }

    fn as_bool(&self) -> Option<bool> {
        ConfigValueExt::as_str(self).and_then(|s| s.to_ascii_lowercase().parse().ok())
    }

    fn as_json<T: DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_slice(self).ok()
    }
}
