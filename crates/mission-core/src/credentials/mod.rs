//! Credential blobs, their merge rule, and the secret stores that hold them.
//!
//! A credential blob is an opaque JSON object. Exactly one substructure is
//! significant to the wrapper: the per-server OAuth map under
//! [`SERVER_MAP_KEY`], where every record carries a numeric `expiresAt`.
//! Everything else is carried through untouched.

pub mod merge;
pub mod store;

pub use merge::{MergeError, MergeOutcome, merge_credentials, token_expiry_millis};
pub use store::{FileSecretStore, MemorySecretStore, SecretStore, SecretStoreError};

#[cfg(feature = "keyring")]
pub use store::KeyringSecretStore;

/// Top-level key of the per-server credential map.
pub const SERVER_MAP_KEY: &str = "mcpOAuth";

/// Field inside each per-server record that decides merge conflicts.
pub const EXPIRES_AT_KEY: &str = "expiresAt";

/// Top-level key of the agent's own OAuth record.
pub const ACCOUNT_OAUTH_KEY: &str = "claudeAiOauth";
