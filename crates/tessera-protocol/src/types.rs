use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ProtocolError;

/// Reserved address reaching any single user.
pub const ANYWHERE: &str = "anywhere";

/// Reserved address reaching every member of every group.
pub const EVERYWHERE: &str = "everywhere";

/// Digest bytes kept from the SHA-256 of a public key.
const DIGEST_LEN: usize = 20;

/// What kind of entity an address belongs to. Encoded as the first byte of
/// a derived address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EntityType {
    User = 0x00,
    Group = 0x01,
    Station = 0x02,
}

impl EntityType {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::User),
            0x01 => Some(Self::Group),
            0x02 => Some(Self::Station),
            _ => None,
        }
    }
}

/// The address part of an identifier: either a public-key-derived hex
/// string or one of the two broadcast words.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    text: String,
    network: EntityType,
}

impl Address {
    /// Derive the address for `public_key`: type byte followed by the
    /// leading bytes of its SHA-256, hex-encoded.
    pub fn derive(public_key: &[u8], network: EntityType) -> Self {
        let digest = Sha256::digest(public_key);
        let mut raw = Vec::with_capacity(1 + DIGEST_LEN);
        raw.push(network as u8);
        raw.extend_from_slice(&digest[..DIGEST_LEN]);
        Self {
            text: hex::encode(raw),
            network,
        }
    }

    pub fn anywhere() -> Self {
        Self {
            text: ANYWHERE.to_string(),
            network: EntityType::User,
        }
    }

    pub fn everywhere() -> Self {
        Self {
            text: EVERYWHERE.to_string(),
            network: EntityType::Group,
        }
    }

    pub fn network(&self) -> EntityType {
        self.network
    }

    pub fn is_broadcast(&self) -> bool {
        self.text == ANYWHERE || self.text == EVERYWHERE
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ANYWHERE => return Ok(Self::anywhere()),
            EVERYWHERE => return Ok(Self::everywhere()),
            _ => {}
        }
        let raw = hex::decode(s).map_err(|_| ProtocolError::InvalidAddress(s.to_string()))?;
        if raw.len() != 1 + DIGEST_LEN {
            return Err(ProtocolError::InvalidAddress(s.to_string()));
        }
        let network =
            EntityType::from_byte(raw[0]).ok_or_else(|| ProtocolError::InvalidAddress(s.to_string()))?;
        Ok(Self {
            text: s.to_ascii_lowercase(),
            network,
        })
    }
}

impl TryFrom<String> for Address {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.text
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// `name@address/terminal`. Two identifiers are equal when name and
/// address match; the terminal only tells devices apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier {
    name: Option<String>,
    address: Address,
    terminal: Option<String>,
}

impl Identifier {
    pub fn new(name: Option<&str>, address: Address, terminal: Option<&str>) -> Self {
        Self {
            name: name.filter(|n| !n.is_empty()).map(str::to_string),
            address,
            terminal: terminal.filter(|t| !t.is_empty()).map(str::to_string),
        }
    }

    /// `anyone@anywhere`
    pub fn anyone() -> Self {
        Self::new(Some("anyone"), Address::anywhere(), None)
    }

    /// `everyone@everywhere`
    pub fn everyone() -> Self {
        Self::new(Some("everyone"), Address::everywhere(), None)
    }

    /// `founder@anywhere`
    pub fn founder() -> Self {
        Self::new(Some("founder"), Address::anywhere(), None)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn terminal(&self) -> Option<&str> {
        self.terminal.as_deref()
    }

    pub fn network(&self) -> EntityType {
        self.address.network()
    }

    pub fn is_broadcast(&self) -> bool {
        self.address.is_broadcast()
    }

    pub fn is_user(&self) -> bool {
        self.network() == EntityType::User
    }

    pub fn is_group(&self) -> bool {
        self.network() == EntityType::Group
    }

    /// Copy without the terminal.
    pub fn without_terminal(&self) -> Self {
        Self {
            name: self.name.clone(),
            address: self.address.clone(),
            terminal: None,
        }
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.address.hash(state);
    }
}

impl FromStr for Identifier {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::InvalidIdentifier(s.to_string());
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }
        let (rest, terminal) = match trimmed.split_once('/') {
            Some((rest, terminal)) => (rest, Some(terminal)),
            None => (trimmed, None),
        };
        let (name, address) = match rest.split_once('@') {
            Some((name, _)) if name.is_empty() => return Err(invalid()),
            Some((name, address)) => (Some(name), address),
            None => (None, rest),
        };
        let address: Address = address.parse().map_err(|_| invalid())?;
        Ok(Self::new(name, address, terminal))
    }
}

impl TryFrom<String> for Identifier {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identifier> for String {
    fn from(identifier: Identifier) -> Self {
        identifier.to_string()
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{name}@")?;
        }
        write!(f, "{}", self.address)?;
        if let Some(terminal) = &self.terminal {
            write!(f, "/{terminal}")?;
        }
        Ok(())
    }
}
