//! Device configuration mini-language: comma-separated `key=value`
//! pairs, or a bare `key` for boolean switches.

use std::collections::BTreeMap;

use iq_dsp::downsampler::FcPos;

use crate::SourceError;

/// Parsed configuration string. Bare switches map to an empty value.
pub struct Settings {
    map: BTreeMap<String, String>,
}

impl Settings {
    /// Parse a configuration string. Later duplicates win.
    pub fn parse(config: &str) -> Self {
        let mut map = BTreeMap::new();
        for item in config.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match item.split_once('=') {
                Some((key, value)) => {
                    map.insert(key.trim().to_string(), value.trim().to_string());
                }
                None => {
                    map.insert(item.to_string(), String::new());
                }
            }
        }
        Self { map }
    }

    /// Reject keys this device family does not understand.
    pub fn check_keys(&self, allowed: &[&str]) -> Result<(), SourceError> {
        for key in self.map.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(SourceError::Config(format!("unknown key '{}'", key)));
            }
        }
        Ok(())
    }

    /// True if the key is present (with or without a value).
    pub fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> Result<u64, SourceError> {
        match self.map.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| SourceError::Config(format!("invalid value for {}: '{}'", key, v))),
        }
    }

    pub fn get_u32(&self, key: &str, default: u32) -> Result<u32, SourceError> {
        match self.map.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| SourceError::Config(format!("invalid value for {}: '{}'", key, v))),
        }
    }

    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64, SourceError> {
        match self.map.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|_| SourceError::Config(format!("invalid value for {}: '{}'", key, v))),
        }
    }

    /// `decim` key: log2 of the decimation factor.
    pub fn decimation(&self) -> Result<u32, SourceError> {
        self.get_u32("decim", 0)
    }

    /// `fcpos` key: 0 = infra, 1 = supra, 2 = center (default).
    pub fn fc_pos(&self) -> Result<FcPos, SourceError> {
        match self.get_u32("fcpos", 2)? {
            0 => Ok(FcPos::Infra),
            1 => Ok(FcPos::Supra),
            2 => Ok(FcPos::Center),
            v => Err(SourceError::Config(format!(
                "invalid value for fcpos: '{}' (expected 0, 1 or 2)",
                v
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_values_and_switches() {
        let s = Settings::parse("freq=100000000,srate=1000000,agc,decim=2");
        assert_eq!(s.get("freq"), Some("100000000"));
        assert_eq!(s.get_u64("freq", 0).unwrap(), 100_000_000);
        assert_eq!(s.get_u32("srate", 0).unwrap(), 1_000_000);
        assert!(s.has("agc"));
        assert_eq!(s.get("agc"), Some(""));
        assert_eq!(s.decimation().unwrap(), 2);
    }

    #[test]
    fn test_defaults_for_missing_keys() {
        let s = Settings::parse("");
        assert_eq!(s.get_u64("freq", 100_000_000).unwrap(), 100_000_000);
        assert_eq!(s.decimation().unwrap(), 0);
        assert!(matches!(s.fc_pos().unwrap(), FcPos::Center));
    }

    #[test]
    fn test_invalid_value_names_key() {
        let s = Settings::parse("srate=fast");
        let err = s.get_u32("srate", 0).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("srate"), "message should name the key: {}", msg);
        assert!(msg.contains("fast"), "message should show the value: {}", msg);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let s = Settings::parse("freq=1000000,bogus=1");
        let err = s.check_keys(&["freq", "srate"]).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_fc_pos_values() {
        assert!(matches!(
            Settings::parse("fcpos=0").fc_pos().unwrap(),
            FcPos::Infra
        ));
        assert!(matches!(
            Settings::parse("fcpos=1").fc_pos().unwrap(),
            FcPos::Supra
        ));
        assert!(Settings::parse("fcpos=3").fc_pos().is_err());
    }

    #[test]
    fn test_whitespace_and_duplicates() {
        let s = Settings::parse(" freq = 7000000 , freq=8000000 ");
        assert_eq!(s.get_u64("freq", 0).unwrap(), 8_000_000);
    }
}
