use serde::{Deserialize, Serialize};
use tessera_crypto::{CipherKey, PrivateKey, PublicKey};

use crate::error::ProtocolError;
use crate::types::Identifier;

/// Group commands that may reach a group nobody has set up yet.
pub const INVITE: &str = "invite";
pub const RESET: &str = "reset";
pub const LOGIN: &str = "login";

/// A login assertion: `identifier` claims to be online via `station`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginCommand {
    pub identifier: Identifier,
    /// Unix seconds; later claims replace earlier ones.
    pub time: i64,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub station: Option<Identifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    Text {
        text: String,
    },
    /// A named command, optionally listing members for group commands.
    Command {
        name: String,
        #[serde(default)]
        members: Vec<Identifier>,
    },
    Login(LoginCommand),
}

/// Decrypted message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub serial: u64,
    pub time: i64,
    /// Group this content belongs to, if any.
    #[serde(default)]
    pub group: Option<Identifier>,
    pub body: Body,
}

impl Content {
    pub fn text(text: &str, time: i64) -> Self {
        Self {
            serial: rand_serial(time),
            time,
            group: None,
            body: Body::Text {
                text: text.to_string(),
            },
        }
    }

    pub fn command(name: &str, time: i64) -> Self {
        Self {
            serial: rand_serial(time),
            time,
            group: None,
            body: Body::Command {
                name: name.to_string(),
                members: Vec::new(),
            },
        }
    }

    pub fn with_group(mut self, group: Identifier) -> Self {
        self.group = Some(group);
        self
    }

    pub fn command_name(&self) -> Option<&str> {
        match &self.body {
            Body::Command { name, .. } => Some(name),
            Body::Login(_) => Some(LOGIN),
            Body::Text { .. } => None,
        }
    }

    /// Group invite or reset: the commands that bootstrap a group.
    pub fn is_group_bootstrap(&self) -> bool {
        matches!(self.command_name(), Some(INVITE | RESET))
    }
}

/// Serial numbers only need to differ between contents of one sender.
fn rand_serial(time: i64) -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    ((time as u64) << 20) ^ COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Routing fields shared by every message stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Identifier,
    pub receiver: Identifier,
    pub time: i64,
    #[serde(default)]
    pub group: Option<Identifier>,
}

impl Envelope {
    /// Associated data binding a ciphertext to its routing.
    pub fn aad(&self) -> Vec<u8> {
        format!("{}->{}", self.sender, self.receiver).into_bytes()
    }
}

/// Plaintext stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstantMessage {
    pub envelope: Envelope,
    pub content: Content,
}

/// Encrypted stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecureMessage {
    pub envelope: Envelope,
    pub data: Vec<u8>,
}

/// Encrypted and signed stage, as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliableMessage {
    pub envelope: Envelope,
    pub data: Vec<u8>,
    pub signature: Vec<u8>,
    /// Entity whose metadata this message is waiting for, while suspended.
    #[serde(default)]
    pub waiting: Option<Identifier>,
}

impl InstantMessage {
    pub fn new(sender: Identifier, receiver: Identifier, content: Content) -> Self {
        Self {
            envelope: Envelope {
                sender,
                receiver,
                time: content.time,
                group: content.group.clone(),
            },
            content,
        }
    }

    pub fn encrypt(&self, key: &CipherKey) -> Result<SecureMessage, ProtocolError> {
        let plaintext = postcard::to_allocvec(&self.content)?;
        let data = key.encrypt(&plaintext, &self.envelope.aad())?;
        Ok(SecureMessage {
            envelope: self.envelope.clone(),
            data,
        })
    }
}

impl SecureMessage {
    pub fn decrypt(&self, key: &CipherKey) -> Result<InstantMessage, ProtocolError> {
        let plaintext = key.decrypt(&self.data, &self.envelope.aad())?;
        let content: Content = postcard::from_bytes(&plaintext)?;
        Ok(InstantMessage {
            envelope: self.envelope.clone(),
            content,
        })
    }

    pub fn sign(self, key: &PrivateKey) -> Result<ReliableMessage, ProtocolError> {
        let signature = key.sign(&self.data)?;
        Ok(ReliableMessage {
            envelope: self.envelope,
            data: self.data,
            signature,
            waiting: None,
        })
    }
}

impl ReliableMessage {
    pub fn verify(&self, key: &PublicKey) -> bool {
        key.verify(&self.data, &self.signature)
    }

    pub fn sender(&self) -> &Identifier {
        &self.envelope.sender
    }

    pub fn receiver(&self) -> &Identifier {
        &self.envelope.receiver
    }

    pub fn to_secure(&self) -> SecureMessage {
        SecureMessage {
            envelope: self.envelope.clone(),
            data: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::Meta;
    use crate::types::EntityType;
    use tessera_crypto::KeyAlgorithm;

    fn user(seed: &str) -> (PrivateKey, Identifier) {
        let key = PrivateKey::generate(KeyAlgorithm::Ed25519).unwrap();
        let meta = Meta::generate(&key, Some(seed)).unwrap();
        let id = meta.generate_identifier(EntityType::User, None);
        (key, id)
    }

    #[test]
    fn encrypt_sign_verify_decrypt() {
        let (alice_key, alice) = user("alice");
        let (_, bob) = user("bob");
        let cipher = CipherKey::generate().unwrap();

        let msg = InstantMessage::new(alice, bob, Content::text("hi bob", 1_700_000_000));
        let reliable = msg.encrypt(&cipher).unwrap().sign(&alice_key).unwrap();
        assert!(reliable.verify(&alice_key.public_key().unwrap()));

        let opened = reliable.to_secure().decrypt(&cipher).unwrap();
        assert_eq!(opened.content, msg.content);
    }

    #[test]
    fn tampered_data_fails_verification() {
        let (alice_key, alice) = user("alice");
        let msg = InstantMessage::new(alice, Identifier::anyone(), Content::text("x", 1));
        let mut reliable = msg.encrypt(&CipherKey::plain()).unwrap().sign(&alice_key).unwrap();
        reliable.data.push(0);
        assert!(!reliable.verify(&alice_key.public_key().unwrap()));
    }

    #[test]
    fn redirected_ciphertext_fails_decrypt() {
        let (_, alice) = user("alice");
        let (_, bob) = user("bob");
        let (_, carol) = user("carol");
        let cipher = CipherKey::generate().unwrap();
        let mut secure = InstantMessage::new(alice, bob, Content::text("x", 1))
            .encrypt(&cipher)
            .unwrap();
        secure.envelope.receiver = carol;
        assert!(secure.decrypt(&cipher).is_err());
    }

    #[test]
    fn bootstrap_commands() {
        assert!(Content::command(INVITE, 1).is_group_bootstrap());
        assert!(Content::command(RESET, 1).is_group_bootstrap());
        assert!(!Content::command("expel", 1).is_group_bootstrap());
        assert!(!Content::text("invite", 1).is_group_bootstrap());
    }

    #[test]
    fn group_copied_into_envelope() {
        let (_, alice) = user("alice");
        let content = Content::text("hello all", 5).with_group(Identifier::everyone());
        let msg = InstantMessage::new(alice, Identifier::everyone(), content);
        assert_eq!(msg.envelope.group, Some(Identifier::everyone()));
    }
}
