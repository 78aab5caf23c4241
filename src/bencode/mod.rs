//! Bencode codec
//!
//! Decodes and encodes the four bencode value kinds used by `.torrent`
//! files and tracker responses. Encoding is canonical: dictionary keys are
//! always emitted in lexicographic byte order.

pub mod decode;
pub mod encode;
pub mod value;

pub use decode::{decode, from_bytes};
pub use encode::{encode, encode_into};
pub use value::{BencodeError, BencodeValue, Dictionary};
