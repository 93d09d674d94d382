//! Streaming digests for staged objects and archive files.
//!
//! Digests are computed synchronously on the calling thread while bytes are
//! copied, so an object is hashed exactly once on its way to disk.

pub mod digester;
pub mod error;
pub mod io;

pub use digester::Digester;
pub use error::{DigestError, DigestResult};
pub use io::DigestWriter;
