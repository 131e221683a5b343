//! Serde helpers and file/string persistence shared by genomes, checkpoints and configs.

use crate::error::Result;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::{fs, path::Path};

/// f64 is written as its u64 bit pattern so weights survive a round trip exactly
pub fn serialize_f64_bits<S: Serializer>(v: &f64, serializer: S) -> core::result::Result<S::Ok, S::Error> {
    v.to_bits().serialize(serializer)
}

pub fn deserialize_f64_bits<'de, D: Deserializer<'de>>(deserializer: D) -> core::result::Result<f64, D::Error> {
    u64::deserialize(deserializer).map(f64::from_bits)
}

/// JSON persistence for anything serde can handle. `check` runs after every load so types with
/// structural invariants can refuse malformed input.
pub trait Persist: Serialize + DeserializeOwned {
    fn check(&self) -> Result<()> {
        Ok(())
    }

    fn to_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    #[allow(clippy::should_implement_trait)]
    fn from_str(s: &str) -> Result<Self> {
        let v: Self = serde_json::from_str(s)?;
        v.check()?;
        Ok(v)
    }

    fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, Persist::to_string(self)?)?;
        Ok(())
    }

    fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_str(&fs::read_to_string(path)?)
    }
}
