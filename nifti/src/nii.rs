//! NIfTI-1 single-file (`.nii`) writer.
//!
//! A 348-byte zero-initialized header with fields at fixed offsets,
//! padding to 352, then the raw voxel payload in Fortran order, little
//! endian. The whole stream can be gzip wrapped for `.nii.gz`.

use crate::types::VoxelScalar;
use byteordered::Endianness;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array3;
use snafu::{ResultExt, Snafu};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const HEADER_LEN: usize = 348;
const VOX_OFFSET: usize = 352;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not create {}", path.display()))]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// failed to write volume data
    WriteData { source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Writer state for one NIfTI volume. Fields default to a unit geometry;
/// the caller fills in what it knows before writing.
#[derive(Debug, Clone)]
pub struct NiiWriter {
    /// voxel sizes, not including qfac
    pub pixdim: [f64; 3],
    /// NIfTI pixdim[0]: +1 or -1
    pub qfac: f64,
    pub qform: i16,
    pub sform: i16,
    /// `(b, c, d, qoffset_x, qoffset_y, qoffset_z)`
    pub qdata: [f64; 6],
    pub descrip: String,
    /// write 1 instead of 0 into unused dim/pixdim slots and the scaling
    /// fields (some consumers insist on it)
    pub one_padding: bool,
    /// gzip wrap the output stream
    pub gzip: bool,
}

impl Default for NiiWriter {
    fn default() -> NiiWriter {
        NiiWriter {
            pixdim: [1.0, 1.0, 1.0],
            qfac: 1.0,
            qform: 0,
            sform: 0,
            qdata: [0.0; 6],
            descrip: String::new(),
            one_padding: false,
            gzip: false,
        }
    }
}

impl NiiWriter {
    pub fn new() -> NiiWriter {
        NiiWriter::default()
    }

    /// Write the volume to the given path, honoring the `gzip` flag.
    pub fn write<T: VoxelScalar>(&self, path: &Path, data: &Array3<T>) -> Result<()> {
        let file = File::create(path).context(CreateFileSnafu { path })?;
        if self.gzip {
            let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
            self.write_to(&mut encoder, data)?;
            encoder.finish().context(WriteDataSnafu)?;
        } else {
            let mut writer = BufWriter::new(file);
            self.write_to(&mut writer, data)?;
            writer.flush().context(WriteDataSnafu)?;
        }
        Ok(())
    }

    /// Write header plus payload to an arbitrary sink.
    pub fn write_to<T: VoxelScalar, W: Write>(&self, writer: &mut W, data: &Array3<T>) -> Result<()> {
        let header = self.header::<T>(data);
        writer.write_all(&header).context(WriteDataSnafu)?;
        // pad to the voxel offset
        writer
            .write_all(&[0u8; VOX_OFFSET - HEADER_LEN])
            .context(WriteDataSnafu)?;

        let shape = data.shape();
        for k in 0..shape[2] {
            for j in 0..shape[1] {
                for i in 0..shape[0] {
                    data[[i, j, k]]
                        .write_to(writer, Endianness::Little)
                        .context(WriteDataSnafu)?;
                }
            }
        }
        Ok(())
    }

    fn header<T: VoxelScalar>(&self, data: &Array3<T>) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_LEN];
        let shape = data.shape();
        let unused = if self.one_padding { 1.0 } else { 0.0 };

        put_i32(&mut h, 0, HEADER_LEN as i32);

        // dim[0] is the rank; unused axes padded
        put_i16(&mut h, 40, 3);
        for axis in 0..7 {
            let extent = if axis < 3 {
                shape[axis] as i16
            } else {
                unused as i16
            };
            put_i16(&mut h, 42 + axis * 2, extent);
        }

        put_i16(&mut h, 70, T::NIFTI_CODE);
        put_i16(&mut h, 72, T::BITPIX);

        put_f32(&mut h, 76, self.qfac as f32);
        for axis in 0..7 {
            let size = if axis < 3 {
                self.pixdim[axis] as f32
            } else {
                unused as f32
            };
            put_f32(&mut h, 80 + axis * 4, size);
        }

        put_f32(&mut h, 108, VOX_OFFSET as f32);

        if self.one_padding {
            put_f32(&mut h, 112, 1.0); // scl_slope
            put_f32(&mut h, 116, 0.0); // scl_inter
        }

        h[123] = 10; // xyzt_units: mm + s

        let descrip = self.descrip.as_bytes();
        let n = descrip.len().min(80);
        h[148..148 + n].copy_from_slice(&descrip[..n]);

        put_i16(&mut h, 252, self.qform);
        put_i16(&mut h, 254, self.sform);
        for (n, q) in self.qdata.iter().enumerate() {
            put_f32(&mut h, 256 + n * 4, *q as f32);
        }

        h[344..348].copy_from_slice(b"n+1\0");
        h
    }
}

fn put_i16(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use ndarray::{Array3, ShapeBuilder};
    use std::io::Read;

    fn volume() -> Array3<i16> {
        Array3::from_shape_vec((2, 2, 2).f(), (1..=8).collect()).unwrap()
    }

    fn get_i16(buf: &[u8], offset: usize) -> i16 {
        i16::from_le_bytes([buf[offset], buf[offset + 1]])
    }

    fn get_f32(buf: &[u8], offset: usize) -> f32 {
        f32::from_le_bytes([
            buf[offset],
            buf[offset + 1],
            buf[offset + 2],
            buf[offset + 3],
        ])
    }

    #[test]
    fn header_fields_at_fixed_offsets() {
        let mut writer = NiiWriter::new();
        writer.pixdim = [0.9375, 0.9375, 2.0];
        writer.qfac = 1.0;
        writer.qform = 1;
        writer.qdata = [0.0, 0.0, 1.0, 110.0, 110.0, 0.0];
        writer.descrip = "3T 3D GR TR=22ms/TE=11ms/FA=20deg/SO=no".to_string();

        let mut out = Vec::new();
        writer.write_to(&mut out, &volume()).unwrap();

        assert_eq!(
            i32::from_le_bytes([out[0], out[1], out[2], out[3]]),
            348,
            "sizeof_hdr"
        );
        assert_eq!(get_i16(&out, 40), 3, "rank");
        assert_eq!(get_i16(&out, 42), 2);
        assert_eq!(get_i16(&out, 44), 2);
        assert_eq!(get_i16(&out, 46), 2);
        assert_eq!(get_i16(&out, 48), 0, "unused dim");
        assert_eq!(get_i16(&out, 70), 4, "datatype int16");
        assert_eq!(get_i16(&out, 72), 16, "bitpix");
        assert_eq!(get_f32(&out, 76), 1.0, "qfac");
        assert_eq!(get_f32(&out, 80), 0.9375);
        assert_eq!(get_f32(&out, 88), 2.0);
        assert_eq!(get_f32(&out, 108), 352.0, "vox_offset");
        assert_eq!(out[123], 10, "xyzt_units");
        assert_eq!(&out[148..150], b"3T");
        assert_eq!(get_i16(&out, 252), 1, "qform_code");
        assert_eq!(get_i16(&out, 254), 0, "sform_code");
        assert_eq!(get_f32(&out, 264), 1.0, "qdata d");
        assert_eq!(get_f32(&out, 268), 110.0, "qoffset_x");
        assert_eq!(&out[344..348], b"n+1\0");
    }

    #[test]
    fn payload_is_fortran_ordered_at_352() {
        let mut out = Vec::new();
        NiiWriter::new().write_to(&mut out, &volume()).unwrap();
        assert_eq!(out.len(), 352 + 16);
        let samples: Vec<i16> = out[352..]
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(samples, (1..=8).collect::<Vec<i16>>());
    }

    #[test]
    fn one_padding_fills_unused_slots() {
        let mut writer = NiiWriter::new();
        writer.one_padding = true;
        let mut out = Vec::new();
        writer.write_to(&mut out, &volume()).unwrap();
        assert_eq!(get_i16(&out, 48), 1, "unused dim padded with 1");
        assert_eq!(get_f32(&out, 92), 1.0, "unused pixdim padded with 1");
        assert_eq!(get_f32(&out, 112), 1.0, "scl_slope");
        assert_eq!(get_f32(&out, 116), 0.0, "scl_inter");
    }

    #[test]
    fn long_descrip_is_truncated() {
        let mut writer = NiiWriter::new();
        writer.descrip = "x".repeat(200);
        let mut out = Vec::new();
        writer.write_to(&mut out, &volume()).unwrap();
        assert_eq!(&out[148..228], "x".repeat(80).as_bytes());
        assert_eq!(out[228], 0);
    }

    #[test]
    fn gzip_wraps_the_whole_stream() {
        let dir = tempfile::tempdir().unwrap();
        let plain_path = dir.path().join("vol.nii");
        let gz_path = dir.path().join("vol.nii.gz");

        let mut writer = NiiWriter::new();
        writer.write(&plain_path, &volume()).unwrap();
        writer.gzip = true;
        writer.write(&gz_path, &volume()).unwrap();

        let plain = std::fs::read(&plain_path).unwrap();
        let mut unzipped = Vec::new();
        GzDecoder::new(std::fs::File::open(&gz_path).unwrap())
            .read_to_end(&mut unzipped)
            .unwrap();
        assert_eq!(plain, unzipped);
    }
}
