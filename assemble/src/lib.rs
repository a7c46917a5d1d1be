#![deny(trivial_casts, trivial_numeric_casts, unsafe_code, unstable_features)]

//! Series assembly for voxconv: grouping per-slice DICOM files into
//! coherent volumes, reconstructing their geometry, and carrying the
//! acquisition biography through to the output side.
//!
//! The flow: [`scan::Scanner`] ingests files and produces per-sub-series
//! [`entity::Entity`] records; [`stack::build_volume`] turns one
//! `(time, echo)` of an entity into an [`orient::OrientedImage`]; the
//! [`index::IndexBuilder`] and [`matcher::NameMatcher`] cover the sidecar
//! and output naming.

pub mod entity;
pub mod index;
pub mod matcher;
pub mod orient;
pub mod scan;
pub mod stack;
pub mod util;

pub use entity::Entity;
pub use orient::{Geometry, OrientedImage, Plane};
pub use scan::{ScanOptions, ScanOutcome, Scanner};
pub use stack::{build_volume, Volume};
