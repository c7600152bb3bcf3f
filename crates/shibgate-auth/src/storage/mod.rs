//! Account persistence.
//!
//! [`AccountStorage`] is the seam between the provisioning state machine and
//! a backend. This crate ships [`InMemoryAccountStorage`]; the PostgreSQL
//! backend lives in `shibgate-auth-postgres`.

pub mod account;
pub mod memory;

pub use account::{Account, AccountState, AccountStorage, AttributeSnapshot, UnknownAccountState};
pub use memory::InMemoryAccountStorage;
