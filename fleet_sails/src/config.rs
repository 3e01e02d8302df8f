use serde::{Deserialize, Serialize};

use crate::declaration::SailKind;
use crate::SailError;

pub const DEFAULT_DATA_URL: &str =
    "https://raw.githubusercontent.com/dailypush/Fleet22/main/data/sails/sail_tags.json";

/// Registry sail-type codes for each declarable kind of sail.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SailTypeCodes {
    pub jib: String,
    pub spinnaker: String,
    pub main: String,
}

impl Default for SailTypeCodes {
    fn default() -> Self {
        Self {
            jib: "J".to_string(),
            spinnaker: "S89".to_string(),
            main: "M".to_string(),
        }
    }
}

impl SailTypeCodes {
    pub fn code_for(&self, kind: SailKind) -> &str {
        match kind {
            SailKind::Jib => &self.jib,
            SailKind::Spinnaker => &self.spinnaker,
            SailKind::Main => &self.main,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub data_url: String,
    pub storage_prefix: String,
    pub schema_version: String,
    pub event_name: String,
    pub sail_types: SailTypeCodes,
    /// Delay before saved slot values are re-applied after a restore.
    pub settle_delay_ms: u64,
    pub hull_debounce_ms: u64,
    pub trend_sailmakers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_url: DEFAULT_DATA_URL.to_string(),
            storage_prefix: "sailDeclaration_".to_string(),
            schema_version: "2.0".to_string(),
            event_name: "J/105 North American Championship".to_string(),
            sail_types: SailTypeCodes::default(),
            settle_delay_ms: 100,
            hull_debounce_ms: 300,
            trend_sailmakers: vec![
                "Quantum".to_string(),
                "North".to_string(),
                "Ullman".to_string(),
            ],
        }
    }
}

impl Config {
    /// Parse a JSON override; keys that are absent keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, SailError> {
        serde_json::from_str(text).map_err(|e| SailError::InvalidData(format!("config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_override_keeps_defaults() {
        let cfg = Config::from_json(r#"{"storage_prefix": "decl_", "sail_types": {"main": "MN"}}"#)
            .unwrap();
        assert_eq!(cfg.storage_prefix, "decl_");
        assert_eq!(cfg.sail_types.main, "MN");
        assert_eq!(cfg.sail_types.jib, "J");
        assert_eq!(cfg.schema_version, "2.0");
        assert_eq!(cfg.settle_delay_ms, 100);
    }

    #[test]
    fn codes_by_kind() {
        let codes = SailTypeCodes::default();
        assert_eq!(codes.code_for(SailKind::Jib), "J");
        assert_eq!(codes.code_for(SailKind::Spinnaker), "S89");
        assert_eq!(codes.code_for(SailKind::Main), "M");
    }

    #[test]
    fn malformed_config_is_invalid_data() {
        assert!(matches!(
            Config::from_json("[1, 2]"),
            Err(SailError::InvalidData(_))
        ));
    }
}
