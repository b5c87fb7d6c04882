//! Core type definitions shared by the tar lifecycle crates.

pub mod digest;
pub mod entry;
pub mod file_name;
pub mod location;
pub mod tar_id;
pub mod write_order;

pub use digest::{DigestType, DigestWithSize};
pub use entry::TarReferentialEntry;
pub use file_name::{
    TAR_EXTENSION, TMP_EXTENSION, TarFileKind, TarFileName, relative_tar_path,
    tar_file_name_to_tar_id,
};
pub use location::TarLocation;
pub use tar_id::TarId;
pub use write_order::WriteOrder;
