//! Internal plumbing errors.
//!
//! Per spec, nothing here is ever visible to a client beyond the `error`
//! / `busy` / `end` frames the router and room already emit; these exist
//! only so that channel-send failures between internal tasks are typed
//! and logged instead of silently `unwrap`ped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("room '{0}' channel is gone")]
    RoomGone(String),

    #[error("registry lock poisoned")]
    RegistryPoisoned,
}
