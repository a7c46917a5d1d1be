#![deny(trivial_casts, trivial_numeric_casts, unsafe_code, unstable_features)]
#![warn(missing_debug_implementations, unused_qualifications, unused_import_braces)]

//! This is the core library of voxconv, containing the basic concepts and
//! data structures for DICOM content: attribute tags, value representations,
//! decoded element values, and the data set (a tag-addressed element map
//! which can also be addressed by dictionary short names).

pub mod dataset;
pub mod dictionary;
pub mod header;
pub mod value;

pub use dataset::{Dataset, Element};
pub use dictionary::{DataDictionary, DictionaryEntry};
pub use header::{Tag, VR};
pub use value::Value;
