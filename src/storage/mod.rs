//! Local credential stores: OS secret store and embedded state databases

pub mod keyring;
pub mod statedb;

pub use keyring::{KeyringSecretStore, SecretStore};
pub use statedb::{SqliteStateDb, StateDb};
