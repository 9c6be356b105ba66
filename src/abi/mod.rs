//! Contract ABIs and revert decoding.

pub mod decoder;
pub mod repository;

pub use decoder::{extract_revert_data, DecodedError, ErrorDecoder, ErrorSignature, RevertDecoder};
pub use repository::{AbiError, AbiRepository, FileAbiRepository};
