// SPDX-FileCopyrightText: Copyright (c) 2017-2023 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A key/value settings map for configuring a client or server port from
//! an external source (config file, environment, CLI flags) without
//! tying this crate to a particular serialization format.

use std::collections::BTreeMap;

/// Default values mirrored from the Modbus over Serial Line / Modbus TCP
/// guides, used when a [`Settings`] map does not provide an explicit
/// value for a given key.
pub(crate) mod defaults {
    pub(crate) const PORT: u16 = 502;
    pub(crate) const TIMEOUT_MS: u64 = 1_000;
    pub(crate) const MAX_CONNECTIONS: usize = 32;
    pub(crate) const BAUD_RATE: u32 = 19_200;
    pub(crate) const DATA_BITS: u8 = 8;
    pub(crate) const STOP_BITS: u8 = 1;
    pub(crate) const PARITY: &str = "even";
    pub(crate) const FLOW_CONTROL: &str = "none";
    pub(crate) const TIMEOUT_FIRST_BYTE_MS: u64 = 1_000;
    pub(crate) const TIMEOUT_INTER_BYTE_MS: u64 = 50;
    pub(crate) const BROADCAST_ENABLED: bool = false;
}

/// An untyped key/value settings map, analogous to the table in spec.md:
/// `type`, `host`, `port`, `timeout`, `maxconn`, `serialPortName`,
/// `baudRate`, `dataBits`, `parity`, `stopBits`, `flowControl`,
/// `timeoutFirstByte`, `timeoutInterByte`, `broadcastEnabled`.
///
/// Unknown keys passed to [`Settings::apply`] are ignored, allowing a
/// single settings source to configure multiple subsystems.
#[derive(Debug, Clone, Default)]
pub(crate) struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    #[must_use]
    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    #[must_use]
    pub(crate) fn get_u16(&self, key: &str, default: u16) -> u16 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    #[must_use]
    pub(crate) fn get_u32(&self, key: &str, default: u32) -> u32 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    #[must_use]
    pub(crate) fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    #[must_use]
    pub(crate) fn get_usize(&self, key: &str, default: usize) -> usize {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    #[must_use]
    pub(crate) fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    /// Merges `other`'s entries into `self`, overwriting existing keys.
    /// Keys that neither map defines keep falling back to
    /// [`defaults`] when read through `get_*`.
    pub(crate) fn apply(&mut self, other: &Settings) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_falls_back_to_default() {
        let settings = Settings::new();
        assert_eq!(settings.get_u16("port", defaults::PORT), defaults::PORT);
    }

    #[test]
    fn explicit_value_overrides_default() {
        let mut settings = Settings::new();
        settings.set("port", "1502");
        assert_eq!(settings.get_u16("port", defaults::PORT), 1502);
    }

    #[test]
    fn apply_merges_and_overwrites() {
        let mut base = Settings::new();
        base.set("host", "127.0.0.1");
        base.set("port", "502");

        let mut overrides = Settings::new();
        overrides.set("port", "1502");
        overrides.set("maxconn", "16");

        base.apply(&overrides);
        assert_eq!(base.get("host"), Some("127.0.0.1"));
        assert_eq!(base.get("port"), Some("1502"));
        assert_eq!(base.get("maxconn"), Some("16"));
    }

    #[test]
    fn unknown_key_is_ignored_by_readers() {
        let mut settings = Settings::new();
        settings.set("nonsense", "whatever");
        assert_eq!(settings.get_bool("broadcastEnabled", defaults::BROADCAST_ENABLED), defaults::BROADCAST_ENABLED);
    }
}
