//! GIPL writer and reader.
//!
//! The 256-byte header is big endian by convention; the magic at offset
//! 252 identifies the format (with byte-swapped variants for files written
//! on the other endianness). The extended block carries min/max, a
//! transformation matrix (zeroed on write) and the origin.

use crate::types::VoxelScalar;
use byteordered::Endianness;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array3;
use snafu::{ensure, ResultExt, Snafu};
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const HEADER_LEN: usize = 256;

/// primary magic number
pub const MAGIC: u32 = 719_555_000;
/// alternate magic
pub const MAGIC2: u32 = 4_026_526_128;
/// primary magic read with swapped byte order
pub const MAGIC_SWAPPED: u32 = 3_096_044_330;
/// alternate magic read with swapped byte order
pub const MAGIC2_SWAPPED: u32 = 2_968_125_423;
/// extension marker at offset 244
pub const EXT_MAGIC: u32 = 815;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("could not create {}", path.display()))]
    CreateFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("could not read {}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// failed to write volume data
    WriteData { source: std::io::Error },

    #[snafu(display("{} is not a GIPL file", path.display()))]
    NotGipl { path: PathBuf },

    #[snafu(display("type code {} does not match the requested voxel type", type_code))]
    TypeMismatch { type_code: u16 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Writer state for one GIPL volume.
#[derive(Debug, Clone)]
pub struct GiplWriter {
    /// voxel sizes; the fourth slot is the (unused) time axis
    pub pixdim: [f32; 4],
    pub descrip: String,
    pub min: f64,
    pub max: f64,
    pub origin: [f64; 4],
    /// write the extended block (min/max/origin) and its marker
    pub extended: bool,
    /// gzip wrap the output stream
    pub gzip: bool,
}

impl Default for GiplWriter {
    fn default() -> GiplWriter {
        GiplWriter {
            pixdim: [1.0, 1.0, 1.0, 1.0],
            descrip: String::new(),
            min: 0.0,
            max: 0.0,
            origin: [0.0; 4],
            extended: true,
            gzip: false,
        }
    }
}

impl GiplWriter {
    pub fn new() -> GiplWriter {
        GiplWriter::default()
    }

    pub fn write<T: VoxelScalar>(&self, path: &Path, data: &Array3<T>) -> Result<()> {
        let file = File::create(path).context(CreateFileSnafu { path })?;
        if self.gzip {
            let mut encoder =
                GzEncoder::new(BufWriter::new(file), Compression::default());
            self.write_to(&mut encoder, data)?;
            encoder.finish().context(WriteDataSnafu)?;
        } else {
            let mut writer = BufWriter::new(file);
            self.write_to(&mut writer, data)?;
            writer.flush().context(WriteDataSnafu)?;
        }
        Ok(())
    }

    pub fn write_to<T: VoxelScalar, W: Write>(&self, writer: &mut W, data: &Array3<T>) -> Result<()> {
        let mut h = vec![0u8; HEADER_LEN];
        let shape = data.shape();

        let dims = [shape[0] as u16, shape[1] as u16, shape[2] as u16, 1u16];
        for (n, d) in dims.iter().enumerate() {
            put_u16(&mut h, n * 2, *d);
        }

        put_u16(&mut h, 8, T::GIPL_CODE);
        for (n, p) in self.pixdim.iter().enumerate() {
            put_f32(&mut h, 10 + n * 4, *p);
        }

        let descrip = self.descrip.as_bytes();
        let len = descrip.len().min(80);
        h[26..26 + len].copy_from_slice(&descrip[..len]);

        // transformation matrix at 106 stays zeroed

        if self.extended {
            put_f64(&mut h, 188, self.min);
            put_f64(&mut h, 196, self.max);
            for (n, o) in self.origin.iter().enumerate() {
                put_f64(&mut h, 204 + n * 8, *o);
            }
            put_u32(&mut h, 244, EXT_MAGIC);
        }

        put_u32(&mut h, 252, MAGIC);
        writer.write_all(&h).context(WriteDataSnafu)?;

        for k in 0..shape[2] {
            for j in 0..shape[1] {
                for i in 0..shape[0] {
                    data[[i, j, k]]
                        .write_to(writer, Endianness::Big)
                        .context(WriteDataSnafu)?;
                }
            }
        }
        Ok(())
    }
}

/// A decoded GIPL header.
#[derive(Debug, Clone, PartialEq)]
pub struct GiplHeader {
    pub dims: [u16; 4],
    pub type_code: u16,
    pub pixdim: [f32; 4],
    pub descrip: String,
    pub min: f64,
    pub max: f64,
    pub origin: [f64; 4],
    pub extended: bool,
    /// byte order the file was written in, detected from the magic
    pub byte_order: Endianness,
}

impl GiplHeader {
    /// Read and validate the header of the file at `path`.
    pub fn read(path: &Path) -> Result<GiplHeader> {
        let mut file = File::open(path).context(ReadFileSnafu { path })?;
        let mut h = [0u8; HEADER_LEN];
        file.read_exact(&mut h).context(ReadFileSnafu { path })?;

        let magic_be = get_u32(&h, 252, Endianness::Big);
        let byte_order = if magic_be == MAGIC || magic_be == MAGIC2 {
            Endianness::Big
        } else if magic_be == MAGIC_SWAPPED || magic_be == MAGIC2_SWAPPED {
            Endianness::Little
        } else {
            return NotGiplSnafu { path }.fail();
        };

        let mut dims = [0u16; 4];
        for (n, d) in dims.iter_mut().enumerate() {
            *d = get_u16(&h, n * 2, byte_order);
        }
        let type_code = get_u16(&h, 8, byte_order);
        let mut pixdim = [0f32; 4];
        for (n, p) in pixdim.iter_mut().enumerate() {
            *p = get_f32(&h, 10 + n * 4, byte_order);
        }
        let descrip = String::from_utf8_lossy(&h[26..106])
            .trim_end_matches('\0')
            .to_string();

        let extended = get_u32(&h, 244, byte_order) == EXT_MAGIC;
        let (min, max, origin) = if extended {
            let mut origin = [0f64; 4];
            for (n, o) in origin.iter_mut().enumerate() {
                *o = get_f64(&h, 204 + n * 8, byte_order);
            }
            (
                get_f64(&h, 188, byte_order),
                get_f64(&h, 196, byte_order),
                origin,
            )
        } else {
            (0.0, 0.0, [0.0; 4])
        };

        Ok(GiplHeader {
            dims,
            type_code,
            pixdim,
            descrip,
            min,
            max,
            origin,
            extended,
            byte_order,
        })
    }

    /// Read the payload as the requested voxel type, Fortran ordered.
    pub fn read_data<T: VoxelScalar>(&self, path: &Path) -> Result<Array3<T>> {
        ensure!(
            self.type_code == T::GIPL_CODE,
            TypeMismatchSnafu {
                type_code: self.type_code
            }
        );

        let count =
            self.dims[0] as usize * self.dims[1] as usize * self.dims[2] as usize;
        let width = (T::BITPIX / 8) as usize;

        let mut file = File::open(path).context(ReadFileSnafu { path })?;
        file.seek(SeekFrom::Start(HEADER_LEN as u64))
            .context(ReadFileSnafu { path })?;
        let mut raw = vec![0u8; count * width];
        file.read_exact(&mut raw).context(ReadFileSnafu { path })?;

        let voxels: Vec<T> = raw
            .chunks_exact(width)
            .map(|c| T::from_chunk(c, self.byte_order))
            .collect();

        use ndarray::ShapeBuilder;
        Array3::from_shape_vec(
            (
                self.dims[0] as usize,
                self.dims[1] as usize,
                self.dims[2] as usize,
            )
                .f(),
            voxels,
        )
        .map_err(|_| Error::TypeMismatch {
            type_code: self.type_code,
        })
    }
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_f32(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn put_f64(buf: &mut [u8], offset: usize, value: f64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

fn get_u16(buf: &[u8], offset: usize, endianness: Endianness) -> u16 {
    let b = [buf[offset], buf[offset + 1]];
    match endianness {
        Endianness::Big => u16::from_be_bytes(b),
        Endianness::Little => u16::from_le_bytes(b),
    }
}

fn get_u32(buf: &[u8], offset: usize, endianness: Endianness) -> u32 {
    let b = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
    match endianness {
        Endianness::Big => u32::from_be_bytes(b),
        Endianness::Little => u32::from_le_bytes(b),
    }
}

fn get_f32(buf: &[u8], offset: usize, endianness: Endianness) -> f32 {
    f32::from_bits(get_u32(buf, offset, endianness))
}

fn get_f64(buf: &[u8], offset: usize, endianness: Endianness) -> f64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[offset..offset + 8]);
    match endianness {
        Endianness::Big => f64::from_be_bytes(b),
        Endianness::Little => f64::from_le_bytes(b),
    }
}
