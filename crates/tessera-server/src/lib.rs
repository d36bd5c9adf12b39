//! Tessera messaging server core: sessions, the group dependency gate,
//! suspended messages and the outbound transmitter, wired together in
//! [`state::ServerState`].

pub mod config;
pub mod error;
pub mod gate;
pub mod session;
pub mod settings;
pub mod state;
pub mod suspend;
pub mod transmitter;

pub use error::MessengerError;
pub use state::ServerState;
