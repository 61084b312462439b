//! Device configuration document: the JSON keys recognized by
//! [`crate::device::Device`] at power-on ([SPEC_FULL] Section 6).

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::gap::RawAddr;

/// Default local name used when a configuration omits `name`, matching
/// `device.py`'s `DEVICE_DEFAULT_NAME`.
pub const DEFAULT_NAME: &str = "Bumble";

/// Default advertising interval (both min and max) when `advertising_interval`
/// is omitted.
pub const DEFAULT_ADVERTISING_INTERVAL: Duration = Duration::from_millis(1000);

/// Device identity and feature configuration, loaded from a JSON document
/// ([SPEC_FULL] Section 6). All fields have defaults matching
/// `device.py`'s `DeviceConfiguration`, so every key is optional.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(with = "bd_addr_opt")]
    pub address: Option<RawAddr>,
    pub class_of_device: u32,
    #[serde(rename = "advertising_interval", with = "millis")]
    pub advertising_interval: Duration,
    pub keystore: Option<String>,
    pub le_enabled: bool,
    pub le_simultaneous_enabled: bool,
    pub classic_sc_enabled: bool,
    pub classic_ssp_enabled: bool,
    pub connectable: bool,
    pub discoverable: bool,
    #[serde(with = "hex_opt")]
    pub irk: Option<[u8; 16]>,
    #[serde(with = "hex_bytes_opt")]
    pub advertising_data: Option<Vec<u8>>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            address: None,
            class_of_device: 0,
            advertising_interval: DEFAULT_ADVERTISING_INTERVAL,
            keystore: None,
            le_enabled: true,
            le_simultaneous_enabled: true,
            classic_sc_enabled: true,
            classic_ssp_enabled: true,
            connectable: true,
            discoverable: true,
            irk: None,
            advertising_data: None,
        }
    }
}

impl DeviceConfig {
    /// Parses a configuration document from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| Error::invalid_argument(format!("invalid device config: {e}")))
    }

    /// Loads a configuration document from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid_argument(format!("cannot read device config: {e}")))?;
        Self::from_json_str(&data)
    }

    /// Returns the configured Identity Resolving Key, or a deterministic
    /// (and explicitly insecure) fallback derived from `address` when none
    /// was configured, matching `device.py`'s `load_from_dict`: the
    /// address's 6 bytes repeated three times, truncated to 16.
    #[must_use]
    pub fn irk_or_derived(&self, address: RawAddr) -> [u8; 16] {
        if let Some(irk) = self.irk {
            return irk;
        }
        let mut derived = [0u8; 16];
        for (i, b) in derived.iter_mut().enumerate() {
            *b = address.0[i % 6];
        }
        derived
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod bd_addr_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::gap::RawAddr;

    pub fn serialize<S: Serializer>(
        v: &Option<RawAddr>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match v {
            Some(a) => s.serialize_str(&a.to_string()),
            None => s.serialize_none(),
        }
    }

    /// Parses the conventional `BD_ADDR` string form (`"FF:EE:DD:CC:BB:AA"`,
    /// most-significant byte first), the inverse of [`RawAddr`]'s `Display`.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<RawAddr>, D::Error> {
        let Some(s) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(serde::de::Error::custom("address must have 6 colon-separated octets"));
        }
        let mut msb_first = [0u8; 6];
        for (i, p) in parts.iter().enumerate() {
            msb_first[i] = u8::from_str_radix(p, 16).map_err(serde::de::Error::custom)?;
        }
        let mut raw = [0u8; 6];
        for i in 0..6 {
            raw[i] = msb_first[5 - i];
        }
        Ok(Some(RawAddr(raw)))
    }
}

mod hex_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        v: &Option<[u8; 16]>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match v {
            Some(b) => s.serialize_str(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<[u8; 16]>, D::Error> {
        let Some(s) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("irk must be exactly 16 bytes"))?;
        Ok(Some(arr))
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        v: &Option<Vec<u8>>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match v {
            Some(b) => s.serialize_str(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Option<Vec<u8>>, D::Error> {
        let Some(s) = Option::<String>::deserialize(d)? else {
            return Ok(None);
        };
        hex::decode(s).map(Some).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let cfg = DeviceConfig::default();
        assert_eq!(cfg.name, DEFAULT_NAME);
        assert!(cfg.le_enabled);
        assert!(cfg.connectable);
        assert!(cfg.irk.is_none());
    }

    #[test]
    fn parses_minimal_json() {
        let cfg = DeviceConfig::from_json_str(r#"{"name":"probe","le_enabled":false}"#).unwrap();
        assert_eq!(cfg.name, "probe");
        assert!(!cfg.le_enabled);
        assert!(cfg.connectable); // untouched keys keep their default
    }

    #[test]
    fn parses_irk_and_advertising_data_hex() {
        let json = format!(
            r#"{{"irk":"{}","advertising_data":"0201060706ff"}}"#,
            "00".repeat(16)
        );
        let cfg = DeviceConfig::from_json_str(&json).unwrap();
        assert_eq!(cfg.irk, Some([0u8; 16]));
        assert_eq!(cfg.advertising_data.unwrap(), hex::decode("0201060706ff").unwrap());
    }

    #[test]
    fn derives_insecure_irk_from_address_when_absent() {
        let cfg = DeviceConfig::default();
        let addr = RawAddr([0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        let derived = cfg.irk_or_derived(addr);
        assert_eq!(derived, [1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6, 1, 2, 3, 4]);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(DeviceConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn address_round_trips_through_display() {
        let cfg = DeviceConfig::from_json_str(r#"{"address":"FF:EE:DD:CC:BB:AA"}"#).unwrap();
        let addr = cfg.address.unwrap();
        assert_eq!(addr.to_string(), "FF:EE:DD:CC:BB:AA");
    }
}
