#![doc = include_str!("../README.md")]

pub mod auth;
pub mod channel;
pub mod config;
pub mod controller;
pub mod error;
pub mod pkce;
pub mod storage;
pub mod types;
pub mod wallet;

// Re-exports for convenient access
pub use auth::{AuthClient, AuthGrant, AuthorizationRequest};
pub use channel::{ChannelClient, ChannelHandler, ChannelState, ConnectOutcome};
pub use config::ClientConfig;
pub use controller::{Bootstrap, SessionController, SessionEvent};
pub use error::Error;
pub use pkce::{generate_code_challenge, generate_code_verifier, generate_state};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SessionStore};
pub use types::{Jwt, Session, User, UserId};
pub use wallet::{WalletError, WalletProvider, WalletSignature};
