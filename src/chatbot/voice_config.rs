//! VOICEVOX synthesis parameters: a closed key set with persisted overrides.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::chatbot::error::{Error, Result};

/// Recognized synthesis parameter keys, in persisted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VoiceVoxKey {
    SpeedScale,
    PitchScale,
    IntonationScale,
    VolumeScale,
    PauseLengthScale,
    PauseLength,
    PrePhonemeLength,
    PostPhonemeLength,
    OutputSamplingRate,
    OutputStereo,
}

impl VoiceVoxKey {
    pub const ALL: [VoiceVoxKey; 10] = [
        VoiceVoxKey::SpeedScale,
        VoiceVoxKey::PitchScale,
        VoiceVoxKey::IntonationScale,
        VoiceVoxKey::VolumeScale,
        VoiceVoxKey::PauseLengthScale,
        VoiceVoxKey::PauseLength,
        VoiceVoxKey::PrePhonemeLength,
        VoiceVoxKey::PostPhonemeLength,
        VoiceVoxKey::OutputSamplingRate,
        VoiceVoxKey::OutputStereo,
    ];

    /// Field name used by the engine's audio query.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpeedScale => "speedScale",
            Self::PitchScale => "pitchScale",
            Self::IntonationScale => "intonationScale",
            Self::VolumeScale => "volumeScale",
            Self::PauseLengthScale => "pauseLengthScale",
            Self::PauseLength => "pauseLength",
            Self::PrePhonemeLength => "prePhonemeLength",
            Self::PostPhonemeLength => "postPhonemeLength",
            Self::OutputSamplingRate => "outputSamplingRate",
            Self::OutputStereo => "outputStereo",
        }
    }

    /// Factory default. `Null` leaves the engine's own default in place.
    pub fn default_value(&self) -> Value {
        match self {
            Self::SpeedScale => json!(1.0),
            Self::PitchScale => json!(0),
            Self::IntonationScale => json!(1.0),
            Self::VolumeScale => json!(1.5),
            Self::PauseLengthScale => json!(0.9),
            Self::PauseLength => Value::Null,
            Self::PrePhonemeLength => json!(0.1),
            Self::PostPhonemeLength => json!(0.1),
            Self::OutputSamplingRate => json!(44100),
            Self::OutputStereo => json!(true),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::OutputStereo, Value::Bool(_)) => true,
            (Self::OutputStereo, _) => false,
            (_, Value::Number(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for VoiceVoxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoiceVoxKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| Error::InvalidConfigKey(s.to_string()))
    }
}

/// Parse a command-line style value: `null`, `true`/`false` or a number.
pub fn parse_value(raw: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(value @ (Value::Null | Value::Bool(_) | Value::Number(_))) => Some(value),
        _ => None,
    }
}

/// Current synthesis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceVoxConfig {
    values: BTreeMap<VoiceVoxKey, Value>,
}

impl Default for VoiceVoxConfig {
    fn default() -> Self {
        Self {
            values: VoiceVoxKey::ALL
                .into_iter()
                .map(|key| (key, key.default_value()))
                .collect(),
        }
    }
}

impl VoiceVoxConfig {
    pub fn get(&self, key: VoiceVoxKey) -> &Value {
        self.values.get(&key).unwrap_or(&Value::Null)
    }

    /// Set a value by its engine field name.
    pub fn set(&mut self, key: &str, value: Value) -> Result<()> {
        let key: VoiceVoxKey = key.parse()?;
        if !key.accepts(&value) {
            return Err(Error::InvalidConfigValue {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        self.values.insert(key, value);
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Snapshot as a flat JSON object keyed by engine field names.
    pub fn as_mapping(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(key, value)| (key.as_str().to_string(), value.clone()))
            .collect()
    }

    /// Copy `query` with every non-null parameter that the query already carries overwritten.
    pub fn apply_to_query(&self, query: &Value) -> Value {
        let mut updated = query.clone();
        if let Some(fields) = updated.as_object_mut() {
            for (key, value) in &self.values {
                if value.is_null() {
                    continue;
                }
                if let Some(slot) = fields.get_mut(key.as_str()) {
                    *slot = value.clone();
                }
            }
        }
        updated
    }

    /// Build from a persisted mapping over the defaults.
    ///
    /// Unknown keys and values of the wrong kind are skipped with a warning.
    fn from_mapping(mapping: &Map<String, Value>) -> Self {
        let mut config = Self::default();
        for (key, value) in mapping {
            if let Err(e) = config.set(key, value.clone()) {
                warn!("Ignoring persisted voice parameter: {e}");
            }
        }
        config
    }

    /// Load persisted parameters.
    ///
    /// When the file cannot be read or parsed, defaults are written to `path`
    /// and returned.
    pub fn load(path: &Path) -> Result<Self> {
        let persisted = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|json| {
                serde_json::from_str::<Map<String, Value>>(&json).map_err(|e| e.to_string())
            });

        match persisted {
            Ok(mapping) => {
                let config = Self::from_mapping(&mapping);
                info!("Loaded voice config from {:?}", path);
                Ok(config)
            }
            Err(e) => {
                warn!("No usable voice config at {:?} ({e}), writing defaults", path);
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&Value::Object(self.as_mapping()))
            .map_err(|e| Error::persistence(path, e.into()))?;
        std::fs::write(path, json).map_err(|e| Error::persistence(path, e))?;
        info!("💾 Saved voice config to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = VoiceVoxConfig::default();
        let mapping = config.as_mapping();
        assert_eq!(mapping.len(), 10);
        assert_eq!(mapping["speedScale"], json!(1.0));
        assert_eq!(mapping["pitchScale"], json!(0));
        assert_eq!(mapping["volumeScale"], json!(1.5));
        assert_eq!(mapping["pauseLength"], Value::Null);
        assert_eq!(mapping["outputSamplingRate"], json!(44100));
        assert_eq!(mapping["outputStereo"], json!(true));
    }

    #[test]
    fn test_set_and_get() {
        let mut config = VoiceVoxConfig::default();
        config.set("speedScale", json!(1.3)).unwrap();
        assert_eq!(config.get(VoiceVoxKey::SpeedScale), &json!(1.3));
    }

    #[test]
    fn test_set_unknown_key() {
        let mut config = VoiceVoxConfig::default();
        let err = config.set("loudness", json!(2)).unwrap_err();
        assert!(matches!(err, Error::InvalidConfigKey(ref k) if k == "loudness"));
    }

    #[test]
    fn test_set_wrong_kind() {
        let mut config = VoiceVoxConfig::default();
        assert!(matches!(
            config.set("outputStereo", json!(1)),
            Err(Error::InvalidConfigValue { .. })
        ));
        assert!(matches!(
            config.set("speedScale", json!("fast")),
            Err(Error::InvalidConfigValue { .. })
        ));
        assert!(config.set("pauseLength", Value::Null).is_ok());
    }

    #[test]
    fn test_reset() {
        let mut config = VoiceVoxConfig::default();
        config.set("pitchScale", json!(0.15)).unwrap();
        config.set("outputStereo", json!(false)).unwrap();
        config.reset();
        assert_eq!(config.as_mapping(), VoiceVoxConfig::default().as_mapping());
    }

    #[test]
    fn test_apply_to_query() {
        let mut config = VoiceVoxConfig::default();
        config.set("speedScale", json!(1.2)).unwrap();

        let query = json!({
            "accent_phrases": [],
            "speedScale": 1.0,
            "pauseLength": 0.4,
            "kana": "コンニチワ"
        });
        let updated = config.apply_to_query(&query);

        assert_eq!(updated["speedScale"], json!(1.2));
        // null in config leaves the engine value alone
        assert_eq!(updated["pauseLength"], json!(0.4));
        // keys absent from the query are not added
        assert!(updated.get("volumeScale").is_none());
        assert_eq!(updated["kana"], json!("コンニチワ"));
        // input untouched
        assert_eq!(query["speedScale"], json!(1.0));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voicevox_config.json");

        let mut config = VoiceVoxConfig::default();
        config.set("intonationScale", json!(1.4)).unwrap();
        config.set("pauseLength", json!(0.2)).unwrap();
        config.save(&path).unwrap();

        let loaded = VoiceVoxConfig::load(&path).unwrap();
        assert_eq!(loaded.as_mapping(), config.as_mapping());
    }

    #[test]
    fn test_load_missing_writes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voicevox_config.json");

        let config = VoiceVoxConfig::load(&path).unwrap();
        assert_eq!(config, VoiceVoxConfig::default());
        assert!(path.exists());

        let written: Map<String, Value> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, VoiceVoxConfig::default().as_mapping());
    }

    #[test]
    fn test_load_merges_over_defaults_and_skips_unknown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("voicevox_config.json");
        std::fs::write(&path, r#"{"volumeScale": 2.0, "whisper": 1}"#).unwrap();

        let config = VoiceVoxConfig::load(&path).unwrap();
        assert_eq!(config.get(VoiceVoxKey::VolumeScale), &json!(2.0));
        assert_eq!(config.get(VoiceVoxKey::SpeedScale), &json!(1.0));
        assert_eq!(config.as_mapping().len(), 10);
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("1.5"), Some(json!(1.5)));
        assert_eq!(parse_value("false"), Some(json!(false)));
        assert_eq!(parse_value("null"), Some(Value::Null));
        assert_eq!(parse_value("fast"), None);
        assert_eq!(parse_value("\"1\""), None);
    }

    #[test]
    fn test_key_round_trip() {
        for key in VoiceVoxKey::ALL {
            assert_eq!(key.as_str().parse::<VoiceVoxKey>().unwrap(), key);
        }
    }
}
