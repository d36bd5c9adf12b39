//! Account and message object model for Tessera, plus the frame codec used
//! when pushing messages to live sessions.

pub mod account;
pub mod codec;
pub mod error;
pub mod messages;
pub mod types;

pub use account::{Document, Meta};
pub use error::ProtocolError;
pub use messages::{Content, Envelope, InstantMessage, LoginCommand, ReliableMessage, SecureMessage};
pub use types::{Address, EntityType, Identifier};
