//! The `index.json` sidecar.
//!
//! All geometric information is reported in DICOM space: `[x y z]` in the
//! DICOM LPS coordinate system, and grid-relative directions like
//! `diffusiongrid` in the `[i j normk]` system of the *original*
//! orientation, regardless of actual slice order or reorientation. The
//! `grid_axes_map` field records the mapping between DICOM `[i j normk]`
//! and output `[I J K]` voxel indices, which depends on the conversion
//! parameters; the world mapping is always `[X Y Z] = [-x -y z]`.

use crate::entity::Entity;
use crate::orient::{map_axis, Geometry};
use crate::scan::StudyKey;
use crate::util::fixser;
use serde::Serialize;
use serde_json::{json, Value as Json};
use std::collections::BTreeMap;

/// Key of one converted series: `(study_id, patient_name, series_key)`.
pub type SeriesRef = (String, String, String);

#[derive(Debug, Serialize)]
pub struct SarIndex {
    pub mode: i64,
    pub most_crit: String,
    pub value_lim: f64,
    pub value_1: f64,
    pub value_2: f64,
    pub value_body: f64,
}

#[derive(Debug, Serialize)]
pub struct PhaseIndex {
    pub axis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub axis_out: Option<String>,
    pub direction: String,
    pub positive: i64,
}

#[derive(Debug, Serialize)]
pub struct SeriesIndex {
    pub id: String,
    pub rows: usize,
    pub cols: usize,
    pub slices: usize,
    pub times: usize,
    pub echoes: usize,
    pub flip_var: String,
    pub flip: f64,
    pub reptimes: Vec<f64>,
    pub echotimes: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_cmt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_cmt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sar: Option<SarIndex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseIndex>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diffusion: Option<Vec<Json>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diffusiongrid: Option<Vec<Json>>,
    pub desc: String,
    #[serde(rename = "type")]
    pub image_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_axes_map: Option<[String; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patient_axes_map: Option<[String; 3]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exdcm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nii: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gipl: Option<String>,
    pub date: String,
    pub time: String,
}

#[derive(Debug, Serialize)]
pub struct StudyIndex {
    pub id: String,
    pub name: String,
    pub series: Vec<SeriesIndex>,
}

/// Collects per-conversion context and renders the sidecar.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    /// replacement patient name, for anonymized output
    pub change_name: Option<String>,
    /// include the exemplar DICOM file reference
    pub use_exdcm: bool,
    /// keep the full path in the exemplar reference
    pub exdcm_path: bool,
    /// axes permutation of each converted series (after flips/reorient)
    pub axes: BTreeMap<SeriesRef, [String; 3]>,
    /// output file name of each converted series
    pub filenames: BTreeMap<SeriesRef, String>,
}

impl IndexBuilder {
    pub fn new() -> IndexBuilder {
        IndexBuilder {
            use_exdcm: true,
            ..Default::default()
        }
    }

    /// Record the outcome of one conversion.
    pub fn record(&mut self, key: SeriesRef, axes: [String; 3], filename: String) {
        self.axes.insert(key.clone(), axes);
        self.filenames.insert(key, filename);
    }

    /// Build the study array for the given scan result.
    pub fn build(&self, studies: &BTreeMap<StudyKey, BTreeMap<String, Entity>>) -> Vec<StudyIndex> {
        let mut out = Vec::new();
        for ((study_id, patient), series_map) in studies {
            let mut keys: Vec<&String> = series_map.keys().collect();
            keys.sort_by_key(|k| fixser(k));

            let series = keys
                .into_iter()
                .map(|k| {
                    self.build_series(
                        (study_id.clone(), patient.clone(), k.clone()),
                        k,
                        &series_map[k],
                    )
                })
                .collect();

            out.push(StudyIndex {
                id: study_id.clone(),
                name: self
                    .change_name
                    .clone()
                    .unwrap_or_else(|| patient.clone()),
                series,
            });
        }
        out
    }

    /// Render the study array as pretty JSON.
    pub fn to_json(&self, studies: &BTreeMap<StudyKey, BTreeMap<String, Entity>>) -> String {
        let built = self.build(studies);
        serde_json::to_string_pretty(&built).unwrap_or_else(|_| "[]".to_string())
    }

    fn build_series(&self, key: SeriesRef, id: &str, e: &Entity) -> SeriesIndex {
        let echotimes = e
            .echoes
            .iter()
            .map(|echo| e.te.get(echo).copied().unwrap_or(0.0))
            .collect();

        let axes = self.axes.get(&key);
        let axis_out = match (&e.phase, axes) {
            (Some(phase), Some(a)) => Some(map_axis(&phase.axis, a)),
            _ => None,
        };

        let (diffusion, diffusiongrid) = diffusion_entries(e);

        let exdcm = if self.use_exdcm {
            e.file.values().next().map(|p| {
                if self.exdcm_path {
                    p.display().to_string()
                } else {
                    p.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| p.display().to_string())
                }
            })
        } else {
            None
        };

        let (nii, gipl) = match self.filenames.get(&key) {
            Some(f) if f.ends_with(".nii") || f.ends_with(".nii.gz") => {
                (Some(f.clone()), None)
            }
            Some(f) if f.ends_with(".gipl") || f.ends_with(".gipl.gz") => {
                (None, Some(f.clone()))
            }
            _ => (None, None),
        };

        SeriesIndex {
            id: id.to_string(),
            rows: e.shape.0,
            cols: e.shape.1,
            slices: e.slices.len(),
            times: e.times.len(),
            echoes: e.echoes.len(),
            flip_var: e.vflip.clone(),
            flip: e.flip,
            reptimes: vec![e.tr],
            echotimes,
            table: e.table.clone(),
            patient_cmt: e.patient_cmt.clone(),
            image_cmt: e.image_cmt.clone(),
            sar: e.sar.as_ref().map(|s| SarIndex {
                mode: s.mode,
                most_crit: s.most_crit.clone(),
                value_lim: s.values.first().copied().unwrap_or(0.0),
                value_1: s.values.get(1).copied().unwrap_or(0.0),
                value_2: s.values.get(2).copied().unwrap_or(0.0),
                value_body: s.body,
            }),
            phase: e.phase.as_ref().map(|p| PhaseIndex {
                axis: p.axis.clone(),
                axis_out,
                direction: p.direction.clone(),
                positive: p.positive,
            }),
            interval: if e.times.len() > 1 {
                Some(e.interval())
            } else {
                None
            },
            diffusion,
            diffusiongrid,
            desc: e.desc.clone(),
            image_type: e.image_type.clone(),
            grid_axes_map: axes.cloned(),
            patient_axes_map: axes
                .map(|_| ["-x".to_string(), "-y".to_string(), "z".to_string()]),
            exdcm,
            nii,
            gipl,
            date: e.date.clone(),
            time: e.time.clone(),
        }
    }
}

/// Diffusion per time in patient coordinates and, re-derived from the
/// original orientation, in grid coordinates.
fn diffusion_entries(e: &Entity) -> (Option<Vec<Json>>, Option<Vec<Json>>) {
    if !e.bval.values().any(Option::is_some) {
        return (None, None);
    }

    let times = e.sorted_times();
    let geometry = Geometry::new(e.res, &e.orient, [0.0; 3], None).ok();

    let mut patient = Vec::new();
    let mut grid = Vec::new();
    for t in &times {
        let bval = e.bval.get(t).copied().flatten();
        let diff = e.diff.get(t).cloned().unwrap_or_default();

        if diff.len() < 3 {
            patient.push(json!([bval, Json::Null]));
            grid.push(json!([bval, Json::Null]));
        } else {
            patient.push(json!([bval, [diff[0], diff[1], diff[2]]]));
            let in_grid = geometry
                .as_ref()
                .and_then(|g| g.dcm_to_grid([diff[0], diff[1], diff[2]]).ok());
            match in_grid {
                Some(v) => grid.push(json!([bval, [v[0], v[1], v[2]]])),
                None => grid.push(json!([bval, Json::Null])),
            }
        }
    }

    (Some(patient), Some(grid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::PhaseInfo;
    use ordered_float::OrderedFloat;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn entity() -> Entity {
        Entity {
            shape: (64, 64),
            res: [1.0, 1.0, 2.0],
            orient: vec![[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]],
            slices: BTreeSet::new(),
            slicesd: BTreeMap::new(),
            echoes: [1].iter().copied().collect(),
            te: [(1, 30.0)].iter().cloned().collect(),
            times: ["0".to_string()].iter().cloned().collect(),
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
            desc: "dti".into(),
            image_type: "ORIGINAL/PRIMARY/M/ND".into(),
            image_subtype: "m".into(),
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
    fn sidecar_records_axes_and_filenames() {
        let mut e = entity();
        e.file.insert(
            (OrderedFloat(0.0), "0".into(), 1),
            PathBuf::from("/data/slice1.dcm"),
        );
        e.phase = Some(PhaseInfo {
            direction: "COL".into(),
            positive: 0,
            axis: "-j".into(),
        });

        let mut studies = BTreeMap::new();
        let mut series = BTreeMap::new();
        series.insert("5".to_string(), e);
        studies.insert(("1.2.3".to_string(), "P".to_string()), series);

        let mut builder = IndexBuilder::new();
        builder.record(
            ("1.2.3".into(), "P".into(), "5".into()),
            ["i".to_string(), "-j".to_string(), "k".to_string()],
            "0005-dti.nii".to_string(),
        );

        let built = builder.build(&studies);
        assert_eq!(built.len(), 1);
        let s = &built[0].series[0];
        assert_eq!(s.id, "5");
        assert_eq!(s.nii.as_deref(), Some("0005-dti.nii"));
        assert_eq!(s.exdcm.as_deref(), Some("slice1.dcm"));
        assert_eq!(
            s.grid_axes_map.as_ref().unwrap(),
            &["i".to_string(), "-j".to_string(), "k".to_string()]
        );
        assert_eq!(
            s.patient_axes_map.as_ref().unwrap(),
            &["-x".to_string(), "-y".to_string(), "z".to_string()]
        );
        // the phase axis was -j; after the j flip it reads J
        assert_eq!(s.phase.as_ref().unwrap().axis_out.as_deref(), Some("J"));
    }

    #[test]
    fn diffusion_arrays_in_both_frames() {
        let mut e = entity();
        e.orient = vec![[0.0, 1.0, 0.0, 0.0, 0.0, -1.0]];
        e.bval.insert("0".into(), Some(0.0));
        e.bval.insert("1".into(), Some(1000.0));
        e.times.insert("1".into());
        e.diff.insert("0".into(), vec![]);
        e.diff.insert("1".into(), vec![0.0, 1.0, 0.0]);

        let (patient, grid) = diffusion_entries(&e);
        let patient = patient.unwrap();
        let grid = grid.unwrap();
        assert_eq!(patient.len(), 2);
        assert_eq!(patient[0], json!([0.0, Json::Null]));
        assert_eq!(patient[1], json!([1000.0, [0.0, 1.0, 0.0]]));
        // sagittal i is (0,1,0): the y gradient is the grid i axis
        let entry = grid[1].as_array().unwrap();
        let v = entry[1].as_array().unwrap();
        assert!((v[0].as_f64().unwrap() - 1.0).abs() < 1e-9);
        assert!(v[1].as_f64().unwrap().abs() < 1e-9);
    }

    #[test]
    fn no_diffusion_when_bvals_absent() {
        let e = entity();
        assert_eq!(diffusion_entries(&e).0, None);
    }
}
