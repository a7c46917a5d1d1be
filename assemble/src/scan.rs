//! The series assembler: groups per-slice DICOM files into (study, patient,
//! series, sub-series) volumes.
//!
//! Real-world input is irregular: Siemens mosaics pack a whole volume into
//! one file, some series interleave several orientations, some carry no
//! temporal tag and encode time in instance numbers, and some files are
//! simply broken. The scanner recovers from every per-file problem by
//! classifying the file with a human-readable reason and moving on; only
//! the reasons and one exemplar path per reason are reported at the end.
//!
//! Orientation rounding is order-dependent by design: merging moves the
//! anchor orientation toward the lower of the two vectors, which can change
//! which later slices fall within range. Near misses and ambiguous
//! assignments are reported so the user can adjust the threshold.

use crate::entity::{Entity, MosaicTile, PhaseInfo, PlaneKey, SarInfo, SliceIndex};
use crate::orient::{lowest, orientation_angles, Geometry};
use crate::util::{alpha_ser, fmt_g, fmt_sig, z_ser};
use byteordered::Endianness;
use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use voxconv_core::{Dataset, Tag, Value};
use voxconv_dictionary_std::tags;
use voxconv_parser::csa::CsaHeader;
use voxconv_parser::{parse_csa, read_path, DicomFile, ReaderOptions};
use walkdir::WalkDir;

/// Recognized scan configuration.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// flatten sequence contents while reading
    pub flat: bool,
    /// enable ACR-NEMA fallback parsing
    pub acr: bool,
    /// parse CSA for each file (slow but accurate mosaic/diffusion detection)
    pub csa: bool,
    /// split series with differing orientations into sub-series
    pub splitorient: bool,
    /// merge orientations within this angular threshold (degrees)
    pub roundorient: bool,
    pub roundorientthresh: f64,
    /// always name sub-series z0000, z0001, ...
    pub nsubseries: bool,
    /// force all files into one synthetic study/name/series
    pub single: bool,
    /// force mosaic unpacking with this many tiles
    pub mosaic: Option<u32>,
    /// sort slices by projection of position onto i x j
    pub slice3d: bool,
    /// use the instance number as slice index when no geometry tags present
    pub sliceinst: bool,
    /// accept and naively stack files lacking orientation/position
    pub stackunk: bool,
    /// extract SAR fields from CSA
    pub sar: bool,
    /// extract the phase-encoding direction
    pub phase: bool,
    /// accepted for compatibility; has no effect on the scan
    pub timehack: bool,
    /// include/exclude regex on the protocol description
    pub seq_include: Option<Regex>,
    pub seq_exclude: Option<Regex>,
    /// include/exclude literal on an ImageType component
    pub type_include: String,
    pub type_exclude: String,
}

impl Default for ScanOptions {
    fn default() -> ScanOptions {
        ScanOptions {
            flat: false,
            acr: false,
            csa: true,
            splitorient: true,
            roundorient: true,
            roundorientthresh: 0.2,
            nsubseries: false,
            single: false,
            mosaic: None,
            slice3d: false,
            sliceinst: false,
            stackunk: false,
            sar: false,
            phase: false,
            timehack: false,
            seq_include: None,
            seq_exclude: None,
            type_include: String::new(),
            type_exclude: String::new(),
        }
    }
}

/// `(study_instance_uid, patient_name)`, possibly rewritten by `--single`.
pub type StudyKey = (String, String);

/// One distinct reason files were skipped or flagged.
#[derive(Debug, Clone)]
pub struct ErrorTally {
    pub reason: String,
    pub count: usize,
    pub exemplar: PathBuf,
}

/// Counters shown while scanning and summarized afterwards.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub errors: Vec<ErrorTally>,
    pub warning_count: usize,
    pub files_seen: usize,
}

/// The scan result: assembled entities plus the error report.
#[derive(Debug)]
pub struct ScanOutcome {
    pub studies: BTreeMap<StudyKey, BTreeMap<String, Entity>>,
    pub report: ScanReport,
}

impl ScanOutcome {
    /// Number of reconstructable volumes across all series.
    pub fn volume_count(&self) -> usize {
        self.studies
            .values()
            .flat_map(|s| s.values())
            .map(Entity::volume_count)
            .sum()
    }
}

#[derive(Debug)]
struct OrientBlock {
    orient: [f64; 6],
    imtype: String,
    suffix: String,
}

/// Everything extracted from one file for one output plane.
#[derive(Clone)]
struct PlaneRecord {
    path: PathBuf,
    endianness: Endianness,
    study: String,
    name: String,
    ser_raw: String,
    echo: i32,
    te: f64,
    tr: f64,
    flip: f64,
    vflip: String,
    desc: String,
    image_type: String,
    imtype: String,
    date: String,
    time_of_day: String,
    stdate: String,
    sttime: String,
    sar: Option<SarInfo>,
    phase: Option<PhaseInfo>,
    table: Option<Vec<i64>>,
    patient_cmt: Option<String>,
    image_cmt: Option<String>,
    instance: i64,
    time: String,
    instance_time: bool,
    rows: usize,
    cols: usize,
    bits: u16,
    pixrep: u16,
    res: [f64; 3],
    orientt: [f64; 6],
    no_geometry: bool,
    slice: f64,
    sliced: [f64; 3],
    pixels: (u64, u32),
    rescale: (f64, f64),
    mosaic: Option<MosaicTile>,
    dtime: String,
    descrip: String,
    diff: Vec<f64>,
    bval: Option<f64>,
}

/// The stateful scanner. Feed it files in a deterministic order (suffix
/// allocation and orientation rounding are order-sensitive), then call
/// [`Scanner::finish`].
#[derive(Debug)]
pub struct Scanner {
    opts: ScanOptions,
    studies: BTreeMap<StudyKey, BTreeMap<String, Entity>>,
    orientations: BTreeMap<StudyKey, BTreeMap<String, Vec<OrientBlock>>>,
    errors: Vec<(String, Vec<PathBuf>)>,
    warning_count: usize,
    files_seen: usize,
    single_study: Option<String>,
    single_name: Option<String>,
    single_ser: Option<String>,
}

impl Scanner {
    pub fn new(opts: ScanOptions) -> Scanner {
        Scanner {
            opts,
            studies: BTreeMap::new(),
            orientations: BTreeMap::new(),
            errors: Vec::new(),
            warning_count: 0,
            files_seen: 0,
            single_study: None,
            single_name: None,
            single_ser: None,
        }
    }

    /// Counters for a live progress display.
    pub fn progress(&self) -> (usize, usize) {
        (self.files_seen, self.warning_count)
    }

    /// Read one file from disk and fold it into the series maps.
    /// All failures are tallied, never propagated.
    pub fn ingest_path(&mut self, path: &Path) {
        let reader_options = ReaderOptions {
            flat: self.opts.flat,
            acr: self.opts.acr,
        };
        match read_path(path, &reader_options) {
            Ok(file) => self.ingest_file(&file),
            Err(e) => {
                self.files_seen += 1;
                self.tally(e.to_string(), path.to_path_buf());
            }
        }
    }

    /// Fold an already-parsed file into the series maps.
    pub fn ingest_file(&mut self, file: &DicomFile) {
        self.files_seen += 1;
        let mut warnings = Vec::new();
        match self.process(file, &mut warnings) {
            Ok(()) => {
                for w in warnings {
                    self.tally(w, file.path.clone());
                }
            }
            Err(reason) => self.tally(reason, file.path.clone()),
        }
    }

    /// Run the post-scan passes and return the outcome.
    pub fn finish(mut self) -> ScanOutcome {
        let mut post: Vec<(String, PathBuf)> = Vec::new();
        if self.opts.splitorient {
            self.rename_subseries();
        }
        self.reconstruct_times(&mut post);
        self.detect_missing(&mut post);
        for (reason, path) in post {
            self.tally(reason, path);
        }

        let errors = self
            .errors
            .iter()
            .map(|(reason, paths)| ErrorTally {
                reason: reason.clone(),
                count: paths.len(),
                exemplar: paths[0].clone(),
            })
            .collect();

        ScanOutcome {
            studies: self.studies,
            report: ScanReport {
                errors,
                warning_count: self.warning_count,
                files_seen: self.files_seen,
            },
        }
    }

    fn tally(&mut self, reason: String, path: PathBuf) {
        self.warning_count += 1;
        match self.errors.iter_mut().find(|(r, _)| *r == reason) {
            Some((_, paths)) => paths.push(path),
            None => self.errors.push((reason, vec![path])),
        }
    }

    /// Extract all per-file fields and insert one plane per mosaic tile
    /// (one plane total for ordinary files).
    fn process(&mut self, file: &DicomFile, warnings: &mut Vec<String>) -> Result<(), String> {
        let ds = &file.dataset;

        let study_raw = str_of(ds, tags::STUDY_INSTANCE_UID).unwrap_or_else(|| "anon".into());
        let name_raw = str_of(ds, tags::PATIENT_NAME).unwrap_or_else(|| "anon".into());

        if self.single_study.is_none() {
            self.single_study = Some(study_raw.clone());
        }
        if self.single_name.is_none() {
            self.single_name = Some(name_raw.clone());
        }

        let (study, name) = if self.opts.single {
            (
                format!("{}_S", self.single_study.as_deref().unwrap_or("anon")),
                format!("{}_S", self.single_name.as_deref().unwrap_or("anon")),
            )
        } else {
            (study_raw, name_raw)
        };

        let echo = int_of(ds, tags::ECHO_NUMBERS).unwrap_or(1) as i32;
        let te = f64_of(ds, tags::ECHO_TIME).unwrap_or(0.0);
        let tr = f64_of(ds, tags::REPETITION_TIME).unwrap_or(0.0);
        let flip = f64_of(ds, tags::FLIP_ANGLE).unwrap_or(0.0);
        let vflip = str_of(ds, tags::VARIABLE_FLIP_ANGLE_FLAG).unwrap_or_else(|| "N".into());

        let desc = str_of(ds, tags::SERIES_DESCRIPTION)
            .or_else(|| str_of(ds, Tag(0x0018, 0x1030)))
            .or_else(|| str_of(ds, tags::STUDY_DESCRIPTION))
            .unwrap_or_else(|| "unknown".into());

        // run description exclusions before other parameters (which might fail)
        if let Some(re) = &self.opts.seq_include {
            if !re.is_match(&desc) {
                return Err("description didn't match include pattern, skipping file".into());
            }
        }
        if let Some(re) = &self.opts.seq_exclude {
            if re.is_match(&desc) {
                return Err("description matched exclude pattern, skipping file".into());
            }
        }

        let image_cmt = str_of(ds, tags::IMAGE_COMMENTS);
        let patient_cmt = str_of(ds, tags::PATIENT_COMMENTS);

        let image_type: Vec<String> = ds
            .value(tags::IMAGE_TYPE)
            .and_then(Value::strs)
            .map(<[String]>::to_vec)
            .ok_or_else(|| missing(tags::IMAGE_TYPE))?;
        let xtype = image_type.join("/");
        let imtype = if image_type.len() > 2 {
            image_type[2].replace(' ', "_").to_lowercase()
        } else {
            String::new()
        };

        if !self.opts.type_include.is_empty()
            && !image_type
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&self.opts.type_include))
        {
            return Err("type didn't match include value, skipping file".into());
        }
        if !self.opts.type_exclude.is_empty()
            && image_type
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&self.opts.type_exclude))
        {
            return Err("type matched exclude value, skipping file".into());
        }

        let mut ser = str_of(ds, tags::SERIES_NUMBER).unwrap_or_else(|| "0".into());
        ser = ser.trim_start_matches(' ').to_string();
        if self.single_ser.is_none() {
            self.single_ser = Some(ser.clone());
        }
        if self.opts.single {
            ser = format!("{}S", self.single_ser.as_deref().unwrap_or("0"));
        }

        let has_position = ds.contains(tags::IMAGE_POSITION_PATIENT);
        let has_orientation = ds.contains(tags::IMAGE_ORIENTATION_PATIENT);
        let mut no_geometry = false;
        if !(has_position && has_orientation) {
            if self.opts.stackunk || self.opts.sliceinst {
                no_geometry = true;
                warnings.push("unknown geometry, using naive stacking".into());
            } else {
                return Err("no geometry, no --stack-unk, skipping file".into());
            }
        }

        let instance = match int_of(ds, tags::INSTANCE_NUMBER) {
            Some(i) => i,
            None => {
                warnings.push("missing instance number, assuming 1".into());
                1
            }
        };

        let (slice, sliced) = if self.opts.slice3d {
            let pos = vec3_of(ds, tags::IMAGE_POSITION_PATIENT)
                .ok_or_else(|| missing(tags::IMAGE_POSITION_PATIENT))?;
            let orn = vec6_of(ds, tags::IMAGE_ORIENTATION_PATIENT)
                .ok_or_else(|| missing(tags::IMAGE_ORIENTATION_PATIENT))?;
            let k = [
                orn[1] * orn[5] - orn[2] * orn[4],
                orn[2] * orn[3] - orn[0] * orn[5],
                orn[0] * orn[4] - orn[1] * orn[3],
            ];
            (k[0] * pos[0] + k[1] * pos[1] + k[2] * pos[2], pos)
        } else if self.opts.sliceinst || no_geometry {
            (instance as f64, [0.0, 0.0, instance as f64])
        } else {
            let pos = vec3_of(ds, tags::IMAGE_POSITION_PATIENT)
                .ok_or_else(|| missing(tags::IMAGE_POSITION_PATIENT))?;
            match f64_of(ds, tags::SLICE_LOCATION) {
                Some(loc) => (loc, pos),
                None => (pos[2], pos),
            }
        };

        let (time, instance_time) = match str_of(ds, tags::TEMPORAL_POSITION_IDENTIFIER) {
            Some(t) => (t.trim().to_string(), false),
            None => match str_of(ds, tags::INSTANCE_NUMBER) {
                Some(t) => (t.trim().to_string(), true),
                None => ("0".to_string(), false),
            },
        };

        let rows = int_of(ds, tags::ROWS).ok_or_else(|| missing(tags::ROWS))? as usize;
        let cols = int_of(ds, tags::COLUMNS).ok_or_else(|| missing(tags::COLUMNS))? as usize;
        let bits = int_of(ds, tags::BITS_ALLOCATED).ok_or_else(|| missing(tags::BITS_ALLOCATED))?
            as u16;
        let pixrep = int_of(ds, tags::PIXEL_REPRESENTATION).unwrap_or(0) as u16;

        let res = match vec_of(ds, tags::PIXEL_SPACING) {
            Some(sp) if sp.len() >= 2 => {
                let thickness = f64_of(ds, tags::SPACING_BETWEEN_SLICES)
                    .or_else(|| f64_of(ds, tags::SLICE_THICKNESS));
                match thickness {
                    Some(t) => [sp[0], sp[1], t],
                    None => {
                        warnings.push("unknown slice thickness, assuming 1mm".into());
                        [sp[0], sp[1], 1.0]
                    }
                }
            }
            _ => {
                warnings.push("unknown resolution, assuming 1x1x1mm".into());
                [1.0, 1.0, 1.0]
            }
        };

        // prefer a study date (fixed for the whole study) over a
        // series-specific date
        let date = nonzero_date(ds, tags::STUDY_DATE)
            .or_else(|| nonzero_date(ds, tags::SERIES_DATE))
            .or_else(|| str_of(ds, tags::ACQUISITION_DATE))
            .unwrap_or_else(|| "00000000".into());
        let time_of_day = str_of(ds, tags::SERIES_TIME)
            .or_else(|| str_of(ds, tags::STUDY_TIME))
            .unwrap_or_else(|| "0000".into());
        let sttime = str_of(ds, tags::STUDY_TIME).unwrap_or_else(|| "0000".into());
        let stdate = nonzero_date(ds, tags::STUDY_DATE).unwrap_or_else(|| "00000000".into());

        // acquisition time varies by scanner: series time, volume time, or
        // per-slice time, so it is kept per plane
        let dtime = str_of(ds, tags::ACQUISITION_TIME).unwrap_or_else(|| time_of_day.clone());

        let orientt: [f64; 6] = if self.opts.sliceinst || no_geometry {
            [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        } else {
            vec6_of(ds, tags::IMAGE_ORIENTATION_PATIENT)
                .ok_or_else(|| missing(tags::IMAGE_ORIENTATION_PATIENT))?
        };

        let rescale = match (
            f64_of(ds, tags::RESCALE_INTERCEPT),
            f64_of(ds, tags::RESCALE_SLOPE),
        ) {
            (Some(intercept), Some(slope)) => (intercept, slope),
            _ => (0.0, 1.0),
        };

        let table = ds
            .value(tags::SIEMENS_TABLE_POSITION)
            .and_then(Value::strs)
            .and_then(|parts| {
                parts
                    .iter()
                    .map(|p| p.trim().parse::<i64>().ok())
                    .collect::<Option<Vec<_>>>()
            });

        let pixels = match ds.value(tags::PIXEL_DATA) {
            Some(&Value::PixelLocator { offset, length }) => (offset, length),
            _ => return Err(missing(tags::PIXEL_DATA)),
        };

        let mut csa = CsaCache::new(ds);
        let type_spaced = image_type.join(" ").to_uppercase();

        // mosaic detection: forced size, definitive CSA check, or a fast
        // check on the ImageType literal
        let mut mosaic_n: Option<u32> = if let Some(n) = self.opts.mosaic {
            Some(n)
        } else if self.opts.csa {
            csa.image()?
                .first("NumberOfImagesInMosaic")
                .and_then(|v| v.trim().parse().ok())
        } else if type_spaced.contains("MOSAIC") {
            csa.image()?
                .first("NumberOfImagesInMosaic")
                .and_then(|v| v.trim().parse().ok())
        } else {
            None
        };

        // StartFMRI "images" carry all the CSA headers of the real thing
        // but hold a small dummy image; do not unpack those as mosaics
        if mosaic_n.is_some() && type_spaced.contains("DUMMY IMAGE") {
            warnings.push("not unpacking mosaic for dummy image".into());
            mosaic_n = None;
        }

        // Siemens diffusion direction, in the DICOM patient coordinate
        // system, a function of time
        let diff: Vec<f64> = if self.opts.csa {
            parse_all(csa.image()?.values("DiffusionGradientDirection")).unwrap_or_default()
        } else {
            match ds.value(tags::SIEMENS_DIFFUSION_DIRECTION) {
                Some(v) => match v.to_f64_vec() {
                    Some(d) => d,
                    // when private group 19 arrives as untyped garbage the
                    // CSA header is the only usable source
                    None => match csa.image() {
                        Ok(h) => {
                            warnings
                                .push("diffusion vector has bad type, using CSA instead".into());
                            parse_all(h.values("DiffusionGradientDirection")).unwrap_or_default()
                        }
                        Err(_) => {
                            warnings
                                .push("diffusion vector has bad type, no CSA available".into());
                            Vec::new()
                        }
                    },
                },
                None => Vec::new(),
            }
        };

        let sar = if self.opts.sar {
            let values = parse_all(csa.series()?.values("SARMostCriticalAspect"))
                .ok_or_else(|| missing(tags::CSA_SERIES_HEADER))?;
            let body = f64_of(ds, tags::SAR_BODY).ok_or_else(|| missing(tags::SAR_BODY))?;
            let most_crit = csa
                .series()?
                .first("RFSWDMostCriticalAspect")
                .ok_or_else(|| missing(tags::CSA_SERIES_HEADER))?
                .to_string();
            let mode = csa
                .series()?
                .first("RFSWDOperationMode")
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| missing(tags::CSA_SERIES_HEADER))?;
            Some(SarInfo {
                values,
                body,
                most_crit,
                mode,
            })
        } else {
            None
        };

        let phase = if self.opts.phase {
            let direction = str_of(ds, tags::PHASE_ENCODING_DIRECTION)
                .ok_or_else(|| missing(tags::PHASE_ENCODING_DIRECTION))?;
            let positive: i64 = csa
                .image()?
                .first("PhaseEncodingDirectionPositive")
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| missing(tags::CSA_IMAGE_HEADER))?;
            let base = match direction.as_str() {
                "ROW" => "i",
                "COL" => "j",
                _ => return Err("unhandled phase encoding direction, skipping file".into()),
            };
            let axis = if positive == 0 {
                format!("-{}", base)
            } else {
                base.to_string()
            };
            Some(PhaseInfo {
                direction,
                positive,
                axis,
            })
        } else {
            None
        };

        let bval = if self.opts.csa {
            csa.image()?
                .first("B_value")
                .and_then(|v| v.trim().parse().ok())
        } else {
            f64_of(ds, tags::SIEMENS_B_VALUE)
        };

        let descrip =
            build_descrip(ds, tr, te, flip, &xtype).unwrap_or_else(|| "missing".to_string());

        let base = PlaneRecord {
            path: file.path.clone(),
            endianness: file.endianness,
            study,
            name,
            ser_raw: ser,
            echo,
            te,
            tr,
            flip,
            vflip,
            desc,
            image_type: xtype,
            imtype,
            date,
            time_of_day,
            stdate,
            sttime,
            sar,
            phase,
            table,
            patient_cmt,
            image_cmt,
            instance,
            time,
            instance_time,
            rows,
            cols,
            bits,
            pixrep,
            res,
            orientt,
            no_geometry,
            slice,
            sliced,
            pixels,
            rescale,
            mosaic: None,
            dtime,
            descrip,
            diff,
            bval,
        };

        match mosaic_n {
            None => self.insert_plane(base, warnings),
            Some(n) => {
                // the scanner emits one file per mosaic group but the
                // volume has n planes; geometry here is guessed from data
                warnings.push("mosaic is not standards-based, beware geometry".into());

                let n = n.max(1) as usize;
                let fac = (n as f64).sqrt().ceil() as usize;
                let mrows = base.rows;
                let mcols = base.cols;
                let rows = mrows / fac;
                let cols = mcols / fac;

                let spacing = f64_of(ds, tags::SPACING_BETWEEN_SLICES)
                    .ok_or_else(|| missing(tags::SPACING_BETWEEN_SLICES))?;

                let i = [base.orientt[0], base.orientt[1], base.orientt[2]];
                let j = [base.orientt[3], base.orientt[4], base.orientt[5]];
                let k = [
                    i[1] * j[2] - i[2] * j[1],
                    i[2] * j[0] - i[0] * j[2],
                    i[0] * j[1] - i[1] * j[0],
                ];

                // the stored position refers to the mosaic corner, not the
                // first tile's corner
                let colcor = (mcols as f64 - cols as f64) / 2.0;
                let rowcor = (mrows as f64 - rows as f64) / 2.0;
                let truepos = [
                    base.sliced[0] + i[0] * base.res[0] * colcor + j[0] * base.res[1] * rowcor,
                    base.sliced[1] + i[1] * base.res[0] * colcor + j[1] * base.res[1] * rowcor,
                    base.sliced[2] + i[2] * base.res[0] * colcor + j[2] * base.res[1] * rowcor,
                ];

                for tile in 0..n {
                    let ft = tile as f64;
                    let mut rec = base.clone();
                    rec.rows = rows;
                    rec.cols = cols;
                    rec.slice = base.slice + spacing * ft;
                    rec.sliced = [
                        truepos[0] + k[0] * spacing * ft,
                        truepos[1] + k[1] * spacing * ft,
                        truepos[2] + k[2] * spacing * ft,
                    ];
                    rec.mosaic = Some(MosaicTile {
                        mrows,
                        mcols,
                        n: tile,
                        rpos: tile / fac,
                        cpos: tile % fac,
                    });
                    self.insert_plane(rec, warnings)?;
                }
                Ok(())
            }
        }
    }

    /// Resolve the orientation sub-series of one plane and record it.
    fn insert_plane(
        &mut self,
        mut rec: PlaneRecord,
        warnings: &mut Vec<String>,
    ) -> Result<(), String> {
        let study_key = (rec.study.clone(), rec.name.clone());
        let blocks = self
            .orientations
            .entry(study_key.clone())
            .or_default()
            .entry(rec.ser_raw.clone())
            .or_default();

        let mut orientt = rec.orientt;
        let mut merged: Option<([f64; 6], [f64; 6])> = None;

        if self.opts.roundorient {
            // never merge orientations with different image types
            // (that would mix up GE volume+projection series)
            let threshold = self.opts.roundorientthresh;
            let mut close_idx = None;
            let mut n_close = 0usize;
            let mut n_near = 0usize;

            for (bi, block) in blocks.iter().enumerate() {
                if block.imtype != rec.imtype {
                    continue;
                }
                let (a1, a2) = orientation_angles(&orientt, &block.orient);
                if a1 < threshold && a2 < threshold {
                    close_idx = Some(bi);
                    n_close += 1;
                }
                if a1 < threshold * 2.0 && a2 < threshold * 2.0 {
                    n_near += 1;
                }
                if n_near > n_close {
                    warnings.push("orientation merge had near miss (< 2*threshold)".into());
                }
            }

            if let Some(bi) = close_idx {
                if n_close > 1 {
                    warnings.push("orientation merge slice assignment is ambiguous".into());
                }
                let old_exact = blocks[bi].orient;
                if old_exact != orientt {
                    let lower = lowest(old_exact, orientt);
                    orientt = lower;
                    blocks[bi].orient = lower;
                    merged = Some((old_exact, lower));
                }
            }
        }

        let mut ser = rec.ser_raw.clone();
        if self.opts.splitorient {
            let sersuff = if rec.no_geometry {
                "unk".to_string()
            } else if let Some(block) = blocks
                .iter()
                .find(|b| b.orient == orientt && b.imtype == rec.imtype)
            {
                block.suffix.clone()
            } else {
                suffix_for(blocks.len())
            };

            match blocks
                .iter_mut()
                .find(|b| b.orient == orientt && b.imtype == rec.imtype)
            {
                Some(block) => block.suffix = sersuff.clone(),
                None => blocks.push(OrientBlock {
                    orient: orientt,
                    imtype: rec.imtype.clone(),
                    suffix: sersuff.clone(),
                }),
            }

            ser.push_str(&sersuff);
        }
        rec.orientt = orientt;

        let series_map = self.studies.entry(study_key).or_default();

        // fixing merged orientation keys must happen after the suffix has
        // been resolved, against the suffixed sub-series
        if let Some((old, lower)) = merged {
            if let Some(entity) = series_map.get_mut(&ser) {
                if entity.orient.contains(&lower) {
                    entity.orient.retain(|o| *o != old);
                } else if let Some(pos) = entity.orient.iter().position(|o| *o == old) {
                    entity.orient[pos] = lower;
                }
            }
        }

        let entity = series_map
            .entry(ser)
            .or_insert_with(|| new_entity(&rec));

        // catenating multiple orientations is allowed; geometry becomes
        // nominal and meaningless if resliced
        if !entity.orient.contains(&rec.orientt) {
            entity.orient.push(rec.orientt);
        }

        // smallest instance number is the sub-series sort key
        if entity.instance > rec.instance {
            entity.instance = rec.instance;
        }

        // each further orientation block sorts into a disjoint slice range
        let sliceoff = 10000.0 * (entity.orient.len() as f64 - 1.0);
        let sliceind: SliceIndex = OrderedFloat(sliceoff + rec.slice);

        entity.slices.insert(sliceind);
        entity.slicesd.insert(sliceind, rec.sliced);
        entity.echoes.insert(rec.echo);
        entity.te.insert(rec.echo, rec.te);
        entity.times.insert(rec.time.clone());

        let key: PlaneKey = (sliceind, rec.time.clone(), rec.echo);
        entity.file.insert(key.clone(), rec.path);
        entity.end.insert(key.clone(), rec.endianness);
        entity.pixels.insert(key.clone(), rec.pixels);
        entity.rescale.insert(key.clone(), rec.rescale);
        entity.mosaic.insert(key.clone(), rec.mosaic);
        entity.dtimes.insert(key.clone(), rec.dtime);
        entity.descrip.insert(key, rec.descrip);
        entity.diff.insert(rec.time.clone(), rec.diff);
        entity.bval.insert(rec.time, rec.bval);

        Ok(())
    }

    /// Rename orientation sub-series where possible:
    /// single block -> no suffix (already the case); all blocks with
    /// distinct anatomical short names -> those names; otherwise `a`..`y`
    /// in instance order; more than 25 blocks or `nsubseries` -> `zNNNN`.
    ///
    /// The series map cannot be renamed while iterating the orientation
    /// index over it, so this computes the mapping first and applies it
    /// second.
    fn rename_subseries(&mut self) {
        let mut moves: Vec<(StudyKey, String, String)> = Vec::new();

        for (study_key, sers) in &self.orientations {
            let series_map = match self.studies.get(study_key) {
                Some(v) => v,
                None => continue,
            };
            for (serk, blocks) in sers {
                if blocks.len() <= 1 {
                    continue;
                }

                let mut subseries: Vec<(i64, [f64; 6], String)> = blocks
                    .iter()
                    .filter_map(|b| {
                        let subser = format!("{}{}", serk, b.suffix);
                        series_map
                            .get(&subser)
                            .map(|e| (e.instance, b.orient, subser))
                    })
                    .collect();
                subseries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.2.cmp(&b.2)));

                let mut mapping: Vec<(String, String)> = Vec::new();
                let mut short_names = !self.opts.nsubseries;

                if short_names {
                    let mut used = BTreeSet::new();
                    for (_, orient, subser) in &subseries {
                        let res = series_map[subser].res;
                        let short = Geometry::new(res, &[*orient], [0.0; 3], None)
                            .map(|g| g.find_orient().short())
                            .unwrap_or("obl");
                        if !used.insert(short) {
                            short_names = false;
                            break;
                        }
                        mapping.push((subser.clone(), format!("{}{}", serk, short)));
                    }
                    if !short_names {
                        mapping.clear();
                    }
                }

                if !short_names {
                    for (idx, (_, _, subser)) in subseries.iter().enumerate() {
                        let label = if self.opts.nsubseries {
                            z_ser(idx)
                        } else {
                            alpha_ser(idx)
                        };
                        mapping.push((subser.clone(), format!("{}{}", serk, label)));
                    }
                }

                for (old, new) in mapping {
                    moves.push((study_key.clone(), old, new));
                }
            }
        }

        for (study_key, old, new) in moves {
            if let Some(series_map) = self.studies.get_mut(&study_key) {
                if let Some(entity) = series_map.remove(&old) {
                    series_map.insert(new, entity);
                }
            }
        }
    }

    /// When no temporal position identifier was available, instance
    /// numbers were recorded as times, so each slice looks like a separate
    /// time point. Collapse these back into volumes: within each
    /// (slice, echo) group, volume membership is the order of the instance
    /// numbers.
    ///
    /// This runs routinely for non-dynamic series; a warning is only
    /// raised when several actual volumes are generated (the conversion is
    /// then a guess).
    fn reconstruct_times(&mut self, post: &mut Vec<(String, PathBuf)>) {
        for series_map in self.studies.values_mut() {
            for entity in series_map.values_mut() {
                if !entity.instance_time {
                    continue;
                }

                let exemplar = match entity.exemplar() {
                    Some(p) => p.clone(),
                    None => continue,
                };

                let mut groups: BTreeMap<(SliceIndex, i32), Vec<i64>> = BTreeMap::new();
                let mut parse_failed = false;
                for (slice, time, echo) in entity.file.keys() {
                    match time.trim().parse::<i64>() {
                        Ok(inst) => groups.entry((*slice, *echo)).or_default().push(inst),
                        Err(_) => parse_failed = true,
                    }
                }
                if parse_failed || groups.is_empty() {
                    tracing::debug!("unparsable instance-number times, not reconstructing");
                    continue;
                }

                let nt = groups.values().map(Vec::len).max().unwrap_or(1);
                let group_sizes: BTreeSet<usize> = groups.values().map(Vec::len).collect();
                if group_sizes.len() > 1 {
                    // with instance-order stacking, the missing planes all
                    // migrate to the later volumes
                    post.push((
                        "missing planes in instance order, gaps may be assigned to wrong volume"
                            .into(),
                        exemplar.clone(),
                    ));
                }

                let mut times_map: BTreeMap<i64, usize> = BTreeMap::new();
                let mut group_deltas: BTreeSet<Vec<i64>> = BTreeSet::new();
                let mut all_deltas: BTreeSet<i64> = BTreeSet::new();
                for group in groups.values_mut() {
                    group.sort_unstable();
                    if group.len() > 1 {
                        let deltas: Vec<i64> = group.windows(2).map(|w| w[1] - w[0]).collect();
                        for d in &deltas {
                            all_deltas.insert(*d);
                        }
                        group_deltas.insert(deltas);
                    }
                    for (position, inst) in group.iter().enumerate() {
                        times_map.insert(*inst, position);
                    }
                }

                if group_deltas.len() > 1 {
                    post.push((
                        "instance spacing inconsistent, multi-volume slice assignment may be wrong"
                            .into(),
                        exemplar.clone(),
                    ));
                } else if all_deltas.len() > 1 {
                    post.push((
                        "instance spacing not constant, series probably has multiple volume axes"
                            .into(),
                        exemplar.clone(),
                    ));
                }

                if nt == entity.times.len() {
                    continue;
                }

                let vol_of = |time: &str| -> String {
                    let inst: i64 = time.trim().parse().unwrap_or(0);
                    times_map.get(&inst).copied().unwrap_or(0).to_string()
                };

                let remap = |key: &PlaneKey| -> PlaneKey {
                    (key.0, vol_of(&key.1), key.2)
                };

                if nt > 1 {
                    for path in entity.file.values() {
                        post.push(("guessing times from instance numbers".into(), path.clone()));
                    }
                }

                entity.file = std::mem::take(&mut entity.file)
                    .into_iter()
                    .map(|(k, v)| (remap(&k), v))
                    .collect();
                entity.end = std::mem::take(&mut entity.end)
                    .into_iter()
                    .map(|(k, v)| (remap(&k), v))
                    .collect();
                entity.pixels = std::mem::take(&mut entity.pixels)
                    .into_iter()
                    .map(|(k, v)| (remap(&k), v))
                    .collect();
                entity.rescale = std::mem::take(&mut entity.rescale)
                    .into_iter()
                    .map(|(k, v)| (remap(&k), v))
                    .collect();
                entity.mosaic = std::mem::take(&mut entity.mosaic)
                    .into_iter()
                    .map(|(k, v)| (remap(&k), v))
                    .collect();
                entity.dtimes = std::mem::take(&mut entity.dtimes)
                    .into_iter()
                    .map(|(k, v)| (remap(&k), v))
                    .collect();
                entity.descrip = std::mem::take(&mut entity.descrip)
                    .into_iter()
                    .map(|(k, v)| (remap(&k), v))
                    .collect();
                entity.diff = std::mem::take(&mut entity.diff)
                    .into_iter()
                    .map(|(t, v)| (vol_of(&t), v))
                    .collect();
                entity.bval = std::mem::take(&mut entity.bval)
                    .into_iter()
                    .map(|(t, v)| (vol_of(&t), v))
                    .collect();
                entity.times = entity.file.keys().map(|(_, t, _)| t.clone()).collect();
            }
        }
    }

    /// Work out which volumes are missing slices.
    fn detect_missing(&mut self, post: &mut Vec<(String, PathBuf)>) {
        for series_map in self.studies.values_mut() {
            for entity in series_map.values_mut() {
                let slices = entity.slices.len() as i64;
                let mut counts: BTreeMap<(String, i32), i64> = BTreeMap::new();
                for (_, time, echo) in entity.file.keys() {
                    *counts.entry((time.clone(), *echo)).or_insert(0) += 1;
                }
                entity.missing = counts
                    .into_iter()
                    .map(|(te, count)| (te, slices - count))
                    .collect();

                if entity.missing.values().any(|&m| m > 0) {
                    if let Some(path) = entity.exemplar() {
                        post.push((
                            "missing slices in volumes generated from series".into(),
                            path.clone(),
                        ));
                    }
                }
            }
        }
    }
}

fn new_entity(rec: &PlaneRecord) -> Entity {
    Entity {
        shape: (rec.cols, rec.rows),
        res: rec.res,
        orient: Vec::new(),
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
        desc: rec.desc.clone(),
        image_type: rec.image_type.clone(),
        image_subtype: rec.imtype.clone(),
        date: rec.date.clone(),
        time: rec.time_of_day.clone(),
        stdate: rec.stdate.clone(),
        sttime: rec.sttime.clone(),
        sar: rec.sar.clone(),
        phase: rec.phase.clone(),
        tr: rec.tr,
        flip: rec.flip,
        vflip: rec.vflip.clone(),
        table: rec.table.clone(),
        patient_cmt: rec.patient_cmt.clone(),
        image_cmt: rec.image_cmt.clone(),
        instance: rec.instance,
        instance_time: rec.instance_time,
        bits: rec.bits,
        pixrep: rec.pixrep,
    }
}

/// Lazily parsed CSA headers for one file.
struct CsaCache<'a> {
    ds: &'a Dataset,
    image: Option<CsaHeader>,
    series: Option<CsaHeader>,
}

impl<'a> CsaCache<'a> {
    fn new(ds: &'a Dataset) -> CsaCache<'a> {
        CsaCache {
            ds,
            image: None,
            series: None,
        }
    }

    fn image(&mut self) -> Result<&CsaHeader, String> {
        if self.image.is_none() {
            self.image = Some(decode(self.ds, tags::CSA_IMAGE_HEADER)?);
        }
        Ok(self.image.get_or_insert_with(CsaHeader::default))
    }

    fn series(&mut self) -> Result<&CsaHeader, String> {
        if self.series.is_none() {
            self.series = Some(decode(self.ds, tags::CSA_SERIES_HEADER)?);
        }
        Ok(self.series.get_or_insert_with(CsaHeader::default))
    }
}

fn decode(ds: &Dataset, tag: Tag) -> Result<CsaHeader, String> {
    match ds.value(tag) {
        Some(Value::Csa(blob)) => {
            parse_csa(blob).map_err(|e| format!("{}, skipping file", e))
        }
        _ => Ok(CsaHeader::default()),
    }
}

fn suffix_for(n: usize) -> String {
    if n == 0 {
        String::new()
    } else {
        format!("o{}", n)
    }
}

fn missing(tag: Tag) -> String {
    format!(
        "missing element (0x{:04x},0x{:04x}), skipping file",
        tag.group(),
        tag.element()
    )
}

fn str_of(ds: &Dataset, tag: Tag) -> Option<String> {
    ds.value(tag).and_then(Value::as_str).map(str::to_string)
}

fn f64_of(ds: &Dataset, tag: Tag) -> Option<f64> {
    ds.value(tag).and_then(Value::as_f64)
}

fn int_of(ds: &Dataset, tag: Tag) -> Option<i64> {
    ds.value(tag).and_then(Value::as_int)
}

fn vec_of(ds: &Dataset, tag: Tag) -> Option<Vec<f64>> {
    ds.value(tag).and_then(Value::to_f64_vec)
}

fn vec3_of(ds: &Dataset, tag: Tag) -> Option<[f64; 3]> {
    let v = vec_of(ds, tag)?;
    if v.len() < 3 {
        return None;
    }
    Some([v[0], v[1], v[2]])
}

fn vec6_of(ds: &Dataset, tag: Tag) -> Option<[f64; 6]> {
    let v = vec_of(ds, tag)?;
    if v.len() < 6 {
        return None;
    }
    Some([v[0], v[1], v[2], v[3], v[4], v[5]])
}

fn nonzero_date(ds: &Dataset, tag: Tag) -> Option<String> {
    str_of(ds, tag).filter(|d| d.trim().parse::<i64>().map(|v| v != 0).unwrap_or(false))
}

fn parse_all(values: &[String]) -> Option<Vec<f64>> {
    values
        .iter()
        .map(|v| v.trim().parse::<f64>().ok())
        .collect()
}

/// SPM writes special descrip fields, for example
/// `"3T 3D RM TR=22.5ms/TE=11.2ms/FA=20deg/SO=no 01-Dec-2012 12:01:01.123"`;
/// this builds a compatible string or reports `None` when a contributing
/// element is missing or malformed.
fn build_descrip(ds: &Dataset, tr: f64, te: f64, flip: f64, image_type: &str) -> Option<String> {
    let scan_options = match ds.value(tags::SCAN_OPTIONS).and_then(Value::strs) {
        Some(parts) if !parts.is_empty() && !parts[0].is_empty() => parts.join("/"),
        _ => "no".to_string(),
    };
    let mosaic = if image_type.contains("MOSAIC") {
        " Mosaic"
    } else {
        ""
    };

    let adate = str_of(ds, tags::ACQUISITION_DATE)?;
    let atime = str_of(ds, tags::ACQUISITION_TIME)?;
    let date = NaiveDate::parse_from_str(adate.trim(), "%Y%m%d").ok()?;
    let (hour, minute, seconds) = split_acq_time(&atime)?;

    let field = f64_of(ds, tags::MAGNETIC_FIELD_STRENGTH)?;
    let acq_type = str_of(ds, tags::MR_ACQUISITION_TYPE)?;
    let scanning: String = ds
        .value(tags::SCANNING_SEQUENCE)
        .and_then(Value::strs)?
        .join("")
        .split_whitespace()
        .collect();

    Some(format!(
        "{}T {} {} TR={}ms/TE={}ms/FA={}deg/SO={} {} {}:{}:{}{}",
        fmt_g(field),
        acq_type,
        scanning,
        fmt_g(tr),
        fmt_g(te),
        fmt_g(flip),
        scan_options,
        date.format("%m-%b-%Y"),
        hour,
        minute,
        fmt_sig(seconds, 5),
        mosaic,
    ))
}

fn split_acq_time(atime: &str) -> Option<(String, String, f64)> {
    let t = atime.trim();
    if t.len() <= 4 || !t.is_char_boundary(4) || !t[..4].chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let seconds: f64 = t[4..].parse().ok()?;
    Some((t[0..2].to_string(), t[2..4].to_string(), seconds))
}

/// Expand directories into their files, depth first, sorted by file name,
/// then apply the optional path filter.
pub fn collect_files(paths: &[PathBuf], pattern: Option<&Regex>) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    if let Some(re) = pattern {
        files.retain(|f| re.is_match(&f.to_string_lossy()));
    }
    files
}
