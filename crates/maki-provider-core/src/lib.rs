pub mod credential;
pub mod family;
pub mod pool;
pub mod risk;
pub mod select;
pub mod settings;

pub use credential::{CredentialNode, CredentialSecrets, LifecycleState};
pub use family::{
    ByteStream, FamilyError, FamilyResult, NativeRequest, RefreshedTokens, StreamItem,
    TransportErrorKind, UpstreamFamily, UpstreamResponse,
};
pub use pool::PoolManager;
pub use risk::engine::{Observation, RiskEngine, next_midnight_ms};
pub use risk::hub::{EventSink, RiskHub};
pub use risk::journal::{JournalSink, RiskEvent};
pub use risk::signal::RiskSignal;
pub use select::{RotationStrategy, SelectError};
pub use settings::{PolicyMode, PoolTuning, RiskSettings, RotationPolicy};
