pub mod fsio;
pub mod kind;

pub use fsio::{FsError, atomic_write_secret};
pub use kind::ProviderKind;

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch. Saturates at zero for pre-epoch clocks.
pub fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
