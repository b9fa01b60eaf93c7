//! Hot module replacement client runtime.
//!
//! Keeps a [`ModuleRegistry`] in sync with a dev server:
//!
//! - [`ClientChannel`] receives `hash`/`ready` push events and tracks the
//!   latest known hash in [`ConnectionState`].
//! - [`UpdateChecker`] runs one update attempt at a time: manifest fetch,
//!   chunk fetch and registration, then [`UpdateApplier`].
//! - [`UpdateApplier`] swaps module records and runs accept callbacks, or
//!   reports the update as uncontained.
//!
//! [`HotClient`] wires these together from a [`ClientConfig`].

pub mod applier;
pub mod channel;
pub mod checker;
pub mod client;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod registrar;
pub mod registry;
pub mod state;
pub mod transport;

pub use applier::{Acceptance, ApplyReport, ModuleFactories, ModuleFailure, UpdateApplier};
pub use channel::{ClientChannel, ClientNotice, FallbackPolicy};
pub use checker::{CheckerOptions, UpdateChecker, UpdateOutcome};
pub use client::HotClient;
pub use config::ClientConfig;
pub use error::{HmrError, HmrResult};
pub use evaluator::{ChunkEvaluator, DataChunkEvaluator};
pub use registrar::{ChunkRegistrar, PendingChunk};
pub use registry::{
    AcceptedUpdate, Exports, HotHandle, ModuleFactory, ModuleRecord, ModuleRegistry,
    ModuleScope, SharedRegistry, module_factory,
};
pub use state::{ConnectionState, HashSnapshot};
pub use transport::{HttpTransport, UpdateTransport};
