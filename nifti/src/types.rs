//! The voxel scalar types the writers can emit, with their NIfTI-1 and
//! GIPL type codes.

use byteordered::Endianness;
use std::io::{self, Write};

/// NIfTI-1 datatype codes (the complete set the format allows).
pub mod nifti_type {
    pub const BOOL: i16 = 1;
    pub const UINT8: i16 = 2;
    pub const INT16: i16 = 4;
    pub const INT32: i16 = 8;
    pub const FLOAT32: i16 = 16;
    pub const COMPLEX64: i16 = 32;
    pub const FLOAT64: i16 = 64;
    pub const INT8: i16 = 256;
    pub const UINT16: i16 = 512;
    pub const UINT32: i16 = 768;
    pub const INT64: i16 = 1024;
    pub const UINT64: i16 = 1280;
    pub const COMPLEX128: i16 = 1792;
}

/// GIPL type codes.
pub mod gipl_type {
    pub const BOOL: u16 = 1;
    pub const INT8: u16 = 7;
    pub const UINT8: u16 = 8;
    pub const INT16: u16 = 15;
    pub const UINT16: u16 = 16;
    pub const INT32: u16 = 31;
    pub const UINT32: u16 = 32;
    pub const FLOAT32: u16 = 64;
    pub const FLOAT64: u16 = 65;
    pub const COMPLEX64: u16 = 192;
    pub const COMPLEX128: u16 = 193;
}

/// A voxel sample that knows its format type codes and byte layout.
pub trait VoxelScalar: Copy {
    /// NIfTI-1 datatype code
    const NIFTI_CODE: i16;
    /// bits per voxel
    const BITPIX: i16;
    /// GIPL type code
    const GIPL_CODE: u16;

    fn write_to<W: Write>(self, writer: &mut W, endianness: Endianness) -> io::Result<()>;

    fn from_chunk(chunk: &[u8], endianness: Endianness) -> Self;
}

macro_rules! voxel_scalar {
    ($t:ty, $nifti:expr, $bitpix:expr, $gipl:expr) => {
        impl VoxelScalar for $t {
            const NIFTI_CODE: i16 = $nifti;
            const BITPIX: i16 = $bitpix;
            const GIPL_CODE: u16 = $gipl;

            fn write_to<W: Write>(
                self,
                writer: &mut W,
                endianness: Endianness,
            ) -> io::Result<()> {
                match endianness {
                    Endianness::Little => writer.write_all(&self.to_le_bytes()),
                    Endianness::Big => writer.write_all(&self.to_be_bytes()),
                }
            }

            fn from_chunk(chunk: &[u8], endianness: Endianness) -> Self {
                const N: usize = std::mem::size_of::<$t>();
                let mut buf = [0u8; N];
                buf.copy_from_slice(&chunk[..N]);
                match endianness {
                    Endianness::Little => <$t>::from_le_bytes(buf),
                    Endianness::Big => <$t>::from_be_bytes(buf),
                }
            }
        }
    };
}

voxel_scalar!(u8, nifti_type::UINT8, 8, gipl_type::UINT8);
voxel_scalar!(i8, nifti_type::INT8, 8, gipl_type::INT8);
voxel_scalar!(u16, nifti_type::UINT16, 16, gipl_type::UINT16);
voxel_scalar!(i16, nifti_type::INT16, 16, gipl_type::INT16);
voxel_scalar!(u32, nifti_type::UINT32, 32, gipl_type::UINT32);
voxel_scalar!(i32, nifti_type::INT32, 32, gipl_type::INT32);
voxel_scalar!(f32, nifti_type::FLOAT32, 32, gipl_type::FLOAT32);
voxel_scalar!(f64, nifti_type::FLOAT64, 64, gipl_type::FLOAT64);
