//! Addressing and identity ports

use crate::domain::call::value_object::ClirOverride;
use crate::domain::shared::value_objects::Handle;

/// Dial string split into the number to call and post-dial digits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitAddress {
    pub number: String,
    /// Digits sent as DTMF once the call is active
    pub dial2nd: Option<String>,
    pub clir: ClirOverride,
}

/// Turns contact handles into dial strings
pub trait AddressResolver: Send + Sync {
    /// Dial string for a contact handle, `None` for unknown handles
    fn inspect(&self, handle: Handle) -> Option<String>;

    fn is_valid_address(&self, destination: &str) -> bool;

    /// Split `destination`, starting from the `clir` chosen by the caller
    fn split_address(&self, destination: &str, clir: ClirOverride) -> SplitAddress;
}

/// Stable mapping between contact identifiers and handles
pub trait HandleRegistry: Send + Sync {
    /// Return the handle for `id`, minting one when needed
    fn ensure(&self, id: &str) -> Handle;

    fn identifier(&self, handle: Handle) -> Option<String>;
}
