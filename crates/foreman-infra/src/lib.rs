//! Infrastructure for the Foreman platform: the authenticated/encrypted
//! TCP implementations of the core transport ports, channel key material,
//! the worker child-process pool, and the built-in utility app registry.

pub mod apps;
pub mod channel;
pub mod process;
