#![deny(trivial_casts, trivial_numeric_casts, unsafe_code, unstable_features)]

//! Output writers for voxconv: NIfTI-1 single-file volumes (optionally
//! gzip wrapped) and GIPL volumes, plus enough of a GIPL reader to verify
//! round trips. Headers are laid out at fixed byte offsets; payloads are
//! written in Fortran (column-major) order.

pub mod gipl;
pub mod nii;
pub mod types;

pub use gipl::{GiplHeader, GiplWriter};
pub use nii::NiiWriter;
pub use types::VoxelScalar;
