//! Contracts implementing access control mechanisms.
pub mod ownable;

pub use ownable::{Error as OwnableError, Ownable};
