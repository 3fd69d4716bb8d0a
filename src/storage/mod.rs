//! Byte-level storage primitives: blob files, encryption, locking,
//! classification and digests.

pub mod accessor;
pub mod cipher;
pub mod classify;
pub mod digest;
pub mod filename;
pub mod lock;
pub mod stream;
