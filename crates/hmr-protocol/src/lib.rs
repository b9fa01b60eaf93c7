//! Wire types for hot module replacement.
//!
//! This crate defines the formats exchanged between the dev server and the
//! in-page update runtime:
//!
//! ```text
//! CompileWatcher --> Broadcaster --[WS: hash, ready]--> ClientChannel
//!                                                            |
//!        static files <--[GET {from}.hot-update.json]-- UpdateChecker
//!                     <--[GET {chunk}.{from}.hot-update.js]--
//! ```
//!
//! ## Addressing
//!
//! Both hot-update assets are keyed by the hash the client is moving *from*,
//! never by the hash it is moving to. The manifest lists the chunks that
//! changed since `from`; each chunk asset carries the new module bodies.

pub mod chunk;
pub mod error;
pub mod events;
pub mod ids;
pub mod manifest;
pub mod paths;

pub use chunk::{ChunkUpdate, ModuleSource};
pub use error::ProtocolError;
pub use events::ServerEvent;
pub use ids::{BuildHash, ChunkId, ModuleId};
pub use manifest::{ChunkChange, UpdateManifest};
pub use paths::{HotUpdateAsset, chunk_path, manifest_path};
