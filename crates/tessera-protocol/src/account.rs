//! Genesis records and signed profile documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tessera_crypto::{KeyAlgorithm, PrivateKey, PublicKey};

use crate::error::ProtocolError;
use crate::types::{Address, EntityType, Identifier};

/// Document kinds. `*` (or an empty string) asks the store to pick the
/// default kind for the entity.
pub const VISA: &str = "visa";
pub const BULLETIN: &str = "bulletin";
pub const PROFILE: &str = "profile";
pub const ANY_DOCUMENT: &str = "*";

/// Immutable binding between a public key and an identifier.
///
/// When a seed is present the identifier's name must equal it, and the
/// fingerprint is the key's signature over the seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub public_key: PublicKey,
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default, with = "fingerprint_hex")]
    pub fingerprint: Option<Vec<u8>>,
}

impl Meta {
    /// Build a genesis record for `private_key`, fingerprinting the seed.
    pub fn generate(private_key: &PrivateKey, seed: Option<&str>) -> Result<Self, ProtocolError> {
        let public_key = private_key.public_key()?;
        let seed = seed.filter(|s| !s.is_empty()).map(str::to_string);
        let fingerprint = match &seed {
            Some(seed) => Some(private_key.sign(seed.as_bytes())?),
            None => None,
        };
        Ok(Self {
            public_key,
            seed,
            fingerprint,
        })
    }

    /// A seed needs a fingerprint that verifies; no seed needs no fingerprint.
    pub fn is_valid(&self) -> bool {
        match (&self.seed, &self.fingerprint) {
            (Some(seed), Some(fingerprint)) => self.public_key.verify(seed.as_bytes(), fingerprint),
            (None, None) => true,
            _ => false,
        }
    }

    pub fn generate_address(&self, network: EntityType) -> Address {
        Address::derive(self.public_key.as_bytes(), network)
    }

    /// Build the identifier this record derives for `network`.
    pub fn generate_identifier(&self, network: EntityType, terminal: Option<&str>) -> Identifier {
        Identifier::new(self.seed.as_deref(), self.generate_address(network), terminal)
    }

    /// Recompute the identifier from this record and compare.
    pub fn match_identifier(&self, identifier: &Identifier) -> bool {
        if !self.is_valid() || identifier.is_broadcast() {
            return false;
        }
        identifier.name() == self.seed.as_deref()
            && self.generate_address(identifier.network()) == *identifier.address()
    }

    pub fn match_public_key(&self, key: &PublicKey) -> bool {
        self.public_key == *key
    }
}

/// A signed, mutable property set for an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub identifier: Identifier,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default, with = "fingerprint_hex")]
    pub signature: Option<Vec<u8>>,
    /// Local soft-expiry stamp (unix seconds). Never signed.
    #[serde(default)]
    pub expires: Option<i64>,
}

/// Bytes covered by a document signature.
#[derive(Serialize)]
struct SignedFields<'a> {
    identifier: &'a Identifier,
    doc_type: &'a str,
    properties: &'a BTreeMap<String, String>,
}

impl Document {
    pub fn new(identifier: Identifier, doc_type: &str) -> Self {
        Self {
            identifier,
            doc_type: doc_type.to_string(),
            properties: BTreeMap::new(),
            signature: None,
            expires: None,
        }
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Changing a property invalidates the signature.
    pub fn set_property(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
        self.signature = None;
    }

    pub fn name(&self) -> Option<&str> {
        self.property("name").filter(|n| !n.is_empty())
    }

    /// Message-signing key published in a visa: hex Ed25519 bytes under `key`.
    pub fn signing_key(&self) -> Option<PublicKey> {
        let data = hex::decode(self.property("key")?).ok()?;
        Some(PublicKey {
            algorithm: KeyAlgorithm::Ed25519,
            data,
        })
    }

    pub fn set_signing_key(&mut self, key: &PublicKey) {
        self.set_property("key", &hex::encode(key.as_bytes()));
    }

    fn signed_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(postcard::to_allocvec(&SignedFields {
            identifier: &self.identifier,
            doc_type: &self.doc_type,
            properties: &self.properties,
        })?)
    }

    pub fn sign(&mut self, key: &PrivateKey) -> Result<(), ProtocolError> {
        let data = self.signed_bytes()?;
        self.signature = Some(key.sign(&data)?);
        Ok(())
    }

    pub fn verify(&self, key: &PublicKey) -> bool {
        let Some(signature) = &self.signature else {
            return false;
        };
        match self.signed_bytes() {
            Ok(data) => key.verify(&data, signature),
            Err(_) => false,
        }
    }
}

/// Optional byte strings as hex.
mod fingerprint_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => hex::decode(text).map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
