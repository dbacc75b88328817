//! Serde helpers for fixed-size byte arrays carried as lowercase hex.

pub mod hex32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(de)?;
        let decoded = hex::decode(&raw).map_err(serde::de::Error::custom)?;
        decoded
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes of hex"))
    }
}

pub mod hex64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<[u8; 64], D::Error> {
        let raw = String::deserialize(de)?;
        let decoded = hex::decode(&raw).map_err(serde::de::Error::custom)?;
        decoded
            .as_slice()
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes of hex"))
    }
}
