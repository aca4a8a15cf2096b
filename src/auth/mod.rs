//! Authentication: bearer-token validation and principal extraction.

pub mod authenticator;
pub mod principal;

pub use authenticator::Authenticator;
pub use principal::Principal;
