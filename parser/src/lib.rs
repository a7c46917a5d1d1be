#![deny(trivial_casts, trivial_numeric_casts, unsafe_code, unstable_features)]

//! A reader of DICOM data sets from files, plus a decoder for the Siemens
//! CSA2 private header format.
//!
//! The reader is deliberately lenient about where the data comes from: files
//! with the `DICM` preamble are parsed in explicit VR little endian starting
//! at offset 132, and (when enabled) bare ACR-NEMA streams are recognized by
//! a first-word heuristic and parsed in implicit VR from offset 0. The byte
//! order and VR explicitness may change mid-stream when the file meta group
//! announces a different transfer syntax; this is a genuine reader-state
//! mutation applied at the recorded byte position, not a re-read.

pub mod csa;
pub mod read;

pub use csa::{parse_csa, CsaField, CsaHeader};
pub use read::{read_path, DicomFile, DicomReader, Error, ReaderOptions};
