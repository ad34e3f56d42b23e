//! modmirror storage library
//!
//! The mirror is where uploaded archives are republished. Every back-end
//! implements [`MirrorStorage`]: push a local file under a remote name and
//! hand back the public URL it is now served from.
//!
//! Remote names are flat or `/`-separated relative keys. They must not contain
//! `..` or start with `/`.

pub mod factory;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_mirror;
#[cfg(feature = "storage-local")]
pub use local::LocalMirror;
pub use memory::MemoryMirror;
pub use modmirror_core::MirrorBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Mirror;
pub use traits::{validate_remote_name, MirrorStorage, StorageError, StorageResult};
