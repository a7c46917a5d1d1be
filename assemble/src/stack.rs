//! Builds one oriented volume from an assembled entity.
//!
//! Pixel handling is deliberately thin: bytes are located via the recorded
//! `(offset, length)` pair, endian-swapped when the source file was big
//! endian, and stacked in ascending slice-index order. Mosaic planes are
//! cut out of their tiled image. A plane recorded as missing is zero
//! filled; the gap is already accounted for in `Entity::missing`.

use crate::entity::{Entity, MosaicTile, PlaneKey};
use crate::orient::{Geometry, GeometryError, OrientedImage};
use byteordered::Endianness;
use ndarray::{Array3, ShapeBuilder};
use snafu::{ensure, ResultExt, Snafu};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum StackError {
    #[snafu(display("could not read pixel data from {}", path.display()))]
    ReadPixels {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("pixel payload of {} is shorter than its plane", path.display()))]
    ShortPayload { path: PathBuf },

    #[snafu(display("unsupported pixel depth of {} bits", bits))]
    UnsupportedDepth { bits: u16 },

    #[snafu(display("volume has no slices"))]
    EmptyVolume,

    #[snafu(display("voxel buffer does not match the volume shape"))]
    ShapeMismatch,

    #[snafu(display("could not determine volume geometry"))]
    BadGeometry { source: GeometryError },
}

pub type Result<T, E = StackError> = std::result::Result<T, E>;

/// A stacked volume, concretely typed by the source pixel depth and
/// representation.
#[derive(Debug)]
pub enum Volume {
    U8(OrientedImage<u8>),
    I8(OrientedImage<i8>),
    U16(OrientedImage<u16>),
    I16(OrientedImage<i16>),
    U32(OrientedImage<u32>),
    I32(OrientedImage<i32>),
}

/// Run an expression against the concrete image inside a [`Volume`].
#[macro_export]
macro_rules! with_volume {
    ($vol:expr, $img:ident => $body:expr) => {
        match $vol {
            $crate::stack::Volume::U8($img) => $body,
            $crate::stack::Volume::I8($img) => $body,
            $crate::stack::Volume::U16($img) => $body,
            $crate::stack::Volume::I16($img) => $body,
            $crate::stack::Volume::U32($img) => $body,
            $crate::stack::Volume::I32($img) => $body,
        }
    };
}

impl Volume {
    /// The shared geometry of the concrete image.
    pub fn geom(&self) -> &Geometry {
        with_volume!(self, img => &img.geom)
    }

    pub fn geom_mut(&mut self) -> &mut Geometry {
        with_volume!(self, img => &mut img.geom)
    }

    /// Storage shape `(cols, rows, slices)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        with_volume!(self, img => {
            let s = img.data.shape();
            (s[0], s[1], s[2])
        })
    }
}

/// One sample of a pixel plane.
pub trait PixelScalar: Copy + Default {
    const BYTES: usize;
    fn from_chunk(chunk: &[u8], endianness: Endianness) -> Self;
}

impl PixelScalar for u8 {
    const BYTES: usize = 1;
    fn from_chunk(chunk: &[u8], _: Endianness) -> u8 {
        chunk[0]
    }
}

impl PixelScalar for i8 {
    const BYTES: usize = 1;
    fn from_chunk(chunk: &[u8], _: Endianness) -> i8 {
        chunk[0] as i8
    }
}

impl PixelScalar for u16 {
    const BYTES: usize = 2;
    fn from_chunk(chunk: &[u8], endianness: Endianness) -> u16 {
        match endianness {
            Endianness::Little => u16::from_le_bytes([chunk[0], chunk[1]]),
            Endianness::Big => u16::from_be_bytes([chunk[0], chunk[1]]),
        }
    }
}

impl PixelScalar for i16 {
    const BYTES: usize = 2;
    fn from_chunk(chunk: &[u8], endianness: Endianness) -> i16 {
        match endianness {
            Endianness::Little => i16::from_le_bytes([chunk[0], chunk[1]]),
            Endianness::Big => i16::from_be_bytes([chunk[0], chunk[1]]),
        }
    }
}

impl PixelScalar for u32 {
    const BYTES: usize = 4;
    fn from_chunk(chunk: &[u8], endianness: Endianness) -> u32 {
        match endianness {
            Endianness::Little => u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            Endianness::Big => u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        }
    }
}

impl PixelScalar for i32 {
    const BYTES: usize = 4;
    fn from_chunk(chunk: &[u8], endianness: Endianness) -> i32 {
        match endianness {
            Endianness::Little => i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
            Endianness::Big => i32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        }
    }
}

/// Stack the planes of one `(time, echo)` volume.
pub fn build_volume(entity: &Entity, time: &str, echo: i32) -> Result<Volume> {
    match (entity.bits, entity.pixrep) {
        (8, 0) => build(entity, time, echo).map(Volume::U8),
        (8, _) => build(entity, time, echo).map(Volume::I8),
        (16, 0) => build(entity, time, echo).map(Volume::U16),
        (16, _) => build(entity, time, echo).map(Volume::I16),
        (32, 0) => build(entity, time, echo).map(Volume::U32),
        (32, _) => build(entity, time, echo).map(Volume::I32),
        (bits, _) => UnsupportedDepthSnafu { bits }.fail(),
    }
}

fn build<T: PixelScalar>(entity: &Entity, time: &str, echo: i32) -> Result<OrientedImage<T>> {
    let (cols, rows) = entity.shape;
    let slices: Vec<_> = entity.slices.iter().copied().collect();
    ensure!(!slices.is_empty(), EmptyVolumeSnafu);

    let mut voxels: Vec<T> = Vec::with_capacity(cols * rows * slices.len());
    for slice in &slices {
        let key: PlaneKey = (*slice, time.to_string(), echo);
        match entity.file.get(&key) {
            // missing plane: zero fill, the gap is recorded in `missing`
            None => voxels.extend(std::iter::repeat(T::default()).take(cols * rows)),
            Some(path) => {
                let (offset, length) = match entity.pixels.get(&key) {
                    Some(&loc) => loc,
                    None => return ShortPayloadSnafu { path: path.clone() }.fail(),
                };
                let endianness = entity
                    .end
                    .get(&key)
                    .copied()
                    .unwrap_or(Endianness::Little);
                let tile = entity.mosaic.get(&key).and_then(Option::as_ref);

                let raw = read_payload(path, offset, length)?;
                extract_plane(&mut voxels, &raw, cols, rows, tile, endianness, path)?;
            }
        }
    }

    let first = slices[0];
    let offset = entity.slicesd.get(&first).copied().unwrap_or([0.0; 3]);
    let delta = if slices.len() >= 2 {
        let second = entity.slicesd.get(&slices[1]).copied().unwrap_or([0.0; 3]);
        Some([
            second[0] - offset[0],
            second[1] - offset[1],
            second[2] - offset[2],
        ])
    } else {
        None
    };

    let mut geom = Geometry::new(entity.res, &entity.orient, offset, delta)
        .context(BadGeometrySnafu)?;
    // the actual inter-slice distance wins over the nominal thickness
    if delta.is_some() {
        geom.use_slice_gap();
    }

    let data = Array3::from_shape_vec((cols, rows, slices.len()).f(), voxels)
        .map_err(|_| StackError::ShapeMismatch)?;

    Ok(OrientedImage { geom, data })
}

fn read_payload(path: &PathBuf, offset: u64, length: u32) -> Result<Vec<u8>> {
    let mut file = File::open(path).context(ReadPixelsSnafu { path: path.clone() })?;
    file.seek(SeekFrom::Start(offset))
        .context(ReadPixelsSnafu { path: path.clone() })?;
    let mut raw = vec![0u8; length as usize];
    file.read_exact(&mut raw)
        .context(ReadPixelsSnafu { path: path.clone() })?;
    Ok(raw)
}

fn extract_plane<T: PixelScalar>(
    voxels: &mut Vec<T>,
    raw: &[u8],
    cols: usize,
    rows: usize,
    tile: Option<&MosaicTile>,
    endianness: Endianness,
    path: &PathBuf,
) -> Result<()> {
    match tile {
        None => {
            ensure!(
                raw.len() >= cols * rows * T::BYTES,
                ShortPayloadSnafu { path: path.clone() }
            );
            for n in 0..cols * rows {
                voxels.push(T::from_chunk(&raw[n * T::BYTES..], endianness));
            }
        }
        Some(tile) => {
            ensure!(
                raw.len() >= tile.mrows * tile.mcols * T::BYTES,
                ShortPayloadSnafu { path: path.clone() }
            );
            for j in 0..rows {
                let mosaic_row = tile.rpos * rows + j;
                for i in 0..cols {
                    let mosaic_col = tile.cpos * cols + i;
                    let src = (mosaic_row * tile.mcols + mosaic_col) * T::BYTES;
                    voxels.push(T::from_chunk(&raw[src..], endianness));
                }
            }
        }
    }
    Ok(())
}
