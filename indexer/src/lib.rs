pub mod app_config;
pub mod applier;
pub mod chain;
pub mod engine;
pub mod event;
pub mod status;
pub mod store;

pub use applier::EventApplier;
pub use chain::{ChainLogSource, DecodeError, ProviderError, RpcLogSource};
pub use engine::{SyncConfig, SyncEngine, SyncError, SyncReport};
pub use event::{DecodedEvent, EscrowEvent};
pub use status::JobStatus;
