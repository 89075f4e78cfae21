//! Encrypted archive engine.
//!
//! An [`Archive`] is a container file with entry metadata plus a flat directory of
//! blobs, one per entry. Blob content is encrypted with a key unique to the entry,
//! and the blob's file name is derived from the plaintext digest and a random salt
//! (see [`address`]).

pub mod address;
pub mod archive;
pub mod batch;
pub mod blob;
pub mod conflict;
pub mod crypto;
pub mod entropy;
pub mod progress;
pub mod shared;
pub mod signal;

pub use {
    crate::{
        archive::{AddItem, Archive, ArchiveOptions, DeleteReport, ValidationReport},
        batch::{BatchOptions, BatchPrompt, BatchSummary},
        shared::SharedArchive,
    },
    blobcrypt_format as format,
};
