//! OpenSASE URL Reputation
//!
//! Hash-list URL reputation for the secure web gateway: a URL is listed
//! when the MD5 digest of one of its canonical forms appears in a block
//! list pulled from a list server.
//!
//! ## Modules
//!
//! - `digest` - MD5 digests of canonical forms
//! - `canonical` - host and path variants of a URL
//! - `store` - versioned block lists and their on-disk snapshots
//! - `protocol` - list server request and response format
//! - `update` - fetching and applying list updates
//! - `lookup` - matching URLs against the loaded lists
//! - `config` - shared TOML configuration

pub mod canonical;
pub mod config;
pub mod digest;
pub mod error;
pub mod lookup;
pub mod protocol;
pub mod store;
pub mod update;

pub use canonical::{canonicalize, Candidate, CandidateSet, MAX_CANDIDATES};
pub use config::{ListConfig, ReputationConfig, UpdateConfig};
pub use digest::{digest, UrlDigest};
pub use error::{CanonicalError, ConfigError, ProtocolError, StoreError, UpdateError};
pub use lookup::{LookupService, Match};
pub use protocol::{ListUpdate, UpdateKind};
pub use store::{BlockList, ListVersion, WatchedList};
pub use update::{sync_list, UpdateClient, UpdateOutcome};

/// Fresh, empty directory under the system temp dir
#[cfg(test)]
pub(crate) fn scratch_dir() -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("sase-reputation-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
