//! The per-sub-series record built up during the scan.
//!
//! One `Entity` holds everything needed to reconstruct the volumes of one
//! sub-series: the per-(slice, time, echo) file/pixel/endian maps, the
//! geometry fields, and the acquisition biography.

use byteordered::Endianness;
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A slice index. Floating point so that mosaic tiles and 3D-projected
/// positions sort correctly; wrapped for total ordering.
pub type SliceIndex = OrderedFloat<f64>;

/// The key of one plane of pixel data: `(slice, time, echo)`.
pub type PlaneKey = (SliceIndex, String, i32);

/// Where one mosaic tile sits inside its mosaic image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MosaicTile {
    /// rows of the whole mosaic image
    pub mrows: usize,
    /// columns of the whole mosaic image
    pub mcols: usize,
    /// tile index
    pub n: usize,
    /// tile row within the mosaic grid
    pub rpos: usize,
    /// tile column within the mosaic grid
    pub cpos: usize,
}

/// SAR data pulled from the CSA series header.
#[derive(Debug, Clone, PartialEq)]
pub struct SarInfo {
    pub values: Vec<f64>,
    pub body: f64,
    pub most_crit: String,
    pub mode: i64,
}

/// Phase-encoding direction, as a grid axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseInfo {
    /// `ROW` or `COL`
    pub direction: String,
    /// CSA `PhaseEncodingDirectionPositive`
    pub positive: i64,
    /// `i`, `j`, `-i` or `-j`
    pub axis: String,
}

/// Everything known about one sub-series.
#[derive(Debug, Clone)]
pub struct Entity {
    /// in-plane shape `(cols, rows)`
    pub shape: (usize, usize),
    /// voxel resolution `(dx, dy, dz)` in millimetres
    pub res: [f64; 3],
    /// distinct orientations folded into this sub-series; more than one
    /// only when orientations were merged within the rounding tolerance
    pub orient: Vec<[f64; 6]>,
    /// slice indices
    pub slices: BTreeSet<SliceIndex>,
    /// 3-vector DICOM position of each slice
    pub slicesd: BTreeMap<SliceIndex, [f64; 3]>,
    /// echo numbers
    pub echoes: BTreeSet<i32>,
    /// TE per echo
    pub te: BTreeMap<i32, f64>,
    /// volume time keys
    pub times: BTreeSet<String>,
    /// acquisition time per plane
    pub dtimes: BTreeMap<PlaneKey, String>,
    /// source file per plane
    pub file: BTreeMap<PlaneKey, PathBuf>,
    /// source byte order per plane
    pub end: BTreeMap<PlaneKey, Endianness>,
    /// pixel payload locator per plane
    pub pixels: BTreeMap<PlaneKey, (u64, u32)>,
    /// (intercept, slope) per plane
    pub rescale: BTreeMap<PlaneKey, (f64, f64)>,
    /// mosaic tile descriptor per plane, when the plane came from a mosaic
    pub mosaic: BTreeMap<PlaneKey, Option<MosaicTile>>,
    /// SPM-style description per plane
    pub descrip: BTreeMap<PlaneKey, String>,
    /// diffusion direction per time (empty when not diffusion)
    pub diff: BTreeMap<String, Vec<f64>>,
    /// B value per time
    pub bval: BTreeMap<String, Option<f64>>,
    /// slice gaps per (time, echo)
    pub missing: BTreeMap<(String, i32), i64>,
    /// series description
    pub desc: String,
    /// whole ImageType, joined with `/`
    pub image_type: String,
    /// the modality-specific ImageType component, normalized
    pub image_subtype: String,
    /// study/series date
    pub date: String,
    /// series/study time
    pub time: String,
    /// study date
    pub stdate: String,
    /// study time
    pub sttime: String,
    pub sar: Option<SarInfo>,
    pub phase: Option<PhaseInfo>,
    pub tr: f64,
    pub flip: f64,
    /// variable flip angle flag
    pub vflip: String,
    /// table position, when the scanner recorded one
    pub table: Option<Vec<i64>>,
    pub patient_cmt: Option<String>,
    pub image_cmt: Option<String>,
    /// smallest instance number seen (sub-series sort key)
    pub instance: i64,
    /// whether time keys were taken from instance numbers
    pub instance_time: bool,
    /// bits allocated per sample
    pub bits: u16,
    /// pixel representation (0 unsigned, 1 signed)
    pub pixrep: u16,
}

impl Entity {
    /// Number of reconstructable volumes.
    pub fn volume_count(&self) -> usize {
        self.times.len() * self.echoes.len()
    }

    /// The path of the lowest-keyed plane, used as an exemplar.
    pub fn exemplar(&self) -> Option<&PathBuf> {
        self.file.values().next()
    }

    /// Time keys in numeric order (falling back to lexicographic for
    /// unparsable keys).
    pub fn sorted_times(&self) -> Vec<String> {
        let mut times: Vec<&String> = self.times.iter().collect();
        times.sort_by(|a, b| {
            let fa = a.trim().parse::<f64>();
            let fb = b.trim().parse::<f64>();
            match (fa, fb) {
                (Ok(x), Ok(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => a.cmp(b),
            }
        });
        times.into_iter().cloned().collect()
    }

    /// The interval between the first two volumes, from the acquisition
    /// times, skipping over keys with unparsable times. Zero for a single
    /// volume.
    pub fn interval(&self) -> f64 {
        if self.times.len() <= 1 {
            return 0.0;
        }
        let times = self.sorted_times();
        let slice = match self.slices.iter().next() {
            Some(s) => *s,
            None => return 0.0,
        };
        let echo = match self.echoes.iter().next() {
            Some(e) => *e,
            None => return 0.0,
        };

        let mut n0 = 0;
        while n0 + 1 < times.len() {
            let t0 = self
                .dtimes
                .get(&(slice, times[n0].clone(), echo))
                .and_then(|t| t.trim().parse::<f64>().ok());
            let t1 = self
                .dtimes
                .get(&(slice, times[n0 + 1].clone(), echo))
                .and_then(|t| t.trim().parse::<f64>().ok());
            if let (Some(t0), Some(t1)) = (t0, t1) {
                return t1 - t0;
            }
            n0 += 1;
        }
        0.0
    }

    /// Sum of recorded slice gaps and the number of gapped volumes.
    pub fn gap_summary(&self) -> (i64, usize) {
        let total = self.missing.values().filter(|&&m| m > 0).sum();
        let volumes = self.missing.values().filter(|&&m| m > 0).count();
        (total, volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skeleton() -> Entity {
        Entity {
            shape: (64, 64),
            res: [1.0, 1.0, 2.0],
            orient: vec![[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]],
            slices: BTreeSet::new(),
            slicesd: BTreeMap::new(),
            echoes: BTreeSet::new(),
            te: BTreeMap::new(),
            times: BTreeSet::new(),
            dtimes: BTreeMap::new(),
            file: BTreeMap::new(),
            end: BTreeMap::new(),
            pixels: BTreeMap::new(),
            rescale: BTreeMap::new(),
            mosaic: BTreeMap::new(),
            descrip: BTreeMap::new(),
            diff: BTreeMap::new(),
            bval: BTreeMap::new(),
            missing: BTreeMap::new(),
            desc: "test".into(),
            image_type: "ORIGINAL/PRIMARY".into(),
            image_subtype: String::new(),
            date: "20200101".into(),
            time: "1200".into(),
            stdate: "20200101".into(),
            sttime: "1200".into(),
            sar: None,
            phase: None,
            tr: 2000.0,
            flip: 90.0,
            vflip: "N".into(),
            table: None,
            patient_cmt: None,
            image_cmt: None,
            instance: 1,
            instance_time: false,
            bits: 16,
            pixrep: 0,
        }
    }

    #[test]
    fn times_sort_numerically() {
        let mut e = skeleton();
        for t in ["0", "2", "10", "1"] {
            e.times.insert(t.to_string());
        }
        assert_eq!(e.sorted_times(), ["0", "1", "2", "10"]);
    }

    #[test]
    fn interval_skips_unparsable_times() {
        let mut e = skeleton();
        let s = OrderedFloat(0.0);
        e.slices.insert(s);
        e.echoes.insert(1);
        for t in ["0", "1", "2"] {
            e.times.insert(t.to_string());
        }
        e.dtimes.insert((s, "0".into(), 1), "bad".into());
        e.dtimes.insert((s, "1".into(), 1), "100.0".into());
        e.dtimes.insert((s, "2".into(), 1), "102.5".into());
        assert!((e.interval() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn gap_summary_counts_only_positive() {
        let mut e = skeleton();
        e.missing.insert(("0".into(), 1), 0);
        e.missing.insert(("1".into(), 1), 2);
        e.missing.insert(("2".into(), 1), 1);
        assert_eq!(e.gap_summary(), (3, 2));
    }
}
