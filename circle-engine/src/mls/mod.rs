//! MLS group engine for location circles.
//!
//! Circles run on MDK, the Marmot Development Kit. MDK owns the RFC 9420
//! group state (ratchet tree, key schedule, framing) and the Marmot group
//! data extension, and persists it in its own SQLite database.
//!
//! # Architecture
//!
//! ```text
//! CircleManager
//!     ↓
//! MlsEngine (thin wrapper, hex in / MDK types out)
//!     ↓
//! MDK<MdkSqliteStorage>
//! ```
//!
//! # Security
//!
//! - Leaf signing keys are MDK-generated and never the Nostr identity key
//! - Only admins listed in the group data extension may commit changes
//! - Members leave through a self-remove proposal

mod engine;
mod error;
mod types;

pub use engine::{KeyPackageBundle, MlsEngine};
pub use error::{MlsError, Result};
pub use types::{
    group_id_from_hex, group_id_to_hex, EngineConfig, GroupConfig, GroupExporterSecret, GroupId,
    GroupMember, GroupResult, MessageProcessingResult, MlsGroup, MlsWelcome,
    NostrGroupConfigData, NostrGroupDataUpdate, UpdateGroupResult,
};
