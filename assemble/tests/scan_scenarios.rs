//! End-to-end assembler scenarios over synthesized data sets.

use byteordered::Endianness;
use ordered_float::OrderedFloat;
use std::path::PathBuf;
use voxconv_assemble::entity::Entity;
use voxconv_assemble::scan::{ScanOptions, ScanOutcome, Scanner};
use voxconv_core::{Dataset, Element, Tag, Value, VR};
use voxconv_parser::DicomFile;

const STUDY_UID: &str = "1.2.826.0.1.999.1";
const PATIENT: &str = "TEST^PATIENT";

fn put_str(ds: &mut Dataset, tag: Tag, vr: VR, value: &str) {
    ds.put(Element::new(tag, vr, Value::from_string(value)));
}

fn put_strs(ds: &mut Dataset, tag: Tag, vr: VR, values: &[&str]) {
    ds.put(Element::new(tag, vr, Value::from_strings(values.iter().copied())));
}

fn put_u16(ds: &mut Dataset, tag: Tag, value: u16) {
    ds.put(Element::new(
        tag,
        VR::US,
        Value::U16s([value].iter().copied().collect()),
    ));
}

/// A plausible single-echo MR slice data set.
fn slice_dataset(ser: &str, instance: i64, z: f64) -> Dataset {
    let mut ds = Dataset::new();
    put_str(&mut ds, Tag(0x0020, 0x000D), VR::UI, STUDY_UID);
    put_str(&mut ds, Tag(0x0010, 0x0010), VR::PN, PATIENT);
    put_strs(
        &mut ds,
        Tag(0x0008, 0x0008),
        VR::CS,
        &["ORIGINAL", "PRIMARY", "M", "ND"],
    );
    put_str(&mut ds, Tag(0x0008, 0x103E), VR::LO, "t1_volume");
    put_str(&mut ds, Tag(0x0008, 0x0020), VR::DA, "20200315");
    put_str(&mut ds, Tag(0x0008, 0x0030), VR::TM, "101500");
    put_str(&mut ds, Tag(0x0008, 0x0031), VR::TM, "102000");
    put_str(&mut ds, Tag(0x0020, 0x0011), VR::IS, ser);
    put_str(&mut ds, Tag(0x0020, 0x0013), VR::IS, &instance.to_string());
    put_strs(
        &mut ds,
        Tag(0x0020, 0x0037),
        VR::DS,
        &["1", "0", "0", "0", "1", "0"],
    );
    {
        let z_str = format!("{}", z);
        let parts = ["-110", "-110", z_str.as_str()];
        put_strs(&mut ds, Tag(0x0020, 0x0032), VR::DS, &parts);
    }
    put_str(&mut ds, Tag(0x0020, 0x1041), VR::DS, &format!("{}", z));
    put_u16(&mut ds, Tag(0x0028, 0x0010), 64);
    put_u16(&mut ds, Tag(0x0028, 0x0011), 64);
    put_u16(&mut ds, Tag(0x0028, 0x0100), 16);
    put_strs(&mut ds, Tag(0x0028, 0x0030), VR::DS, &["0.9375", "0.9375"]);
    put_str(&mut ds, Tag(0x0018, 0x0088), VR::DS, "2.0");
    ds.put(Element::new(
        Tag(0x7FE0, 0x0010),
        VR::OW,
        Value::PixelLocator {
            offset: 512,
            length: 64 * 64 * 2,
        },
    ));
    ds
}

fn dicom_file(name: &str, dataset: Dataset) -> DicomFile {
    DicomFile {
        path: PathBuf::from(name),
        dataset,
        endianness: Endianness::Little,
    }
}

fn scan(files: Vec<DicomFile>, opts: ScanOptions) -> ScanOutcome {
    let mut scanner = Scanner::new(opts);
    for f in &files {
        scanner.ingest_file(f);
    }
    scanner.finish()
}

fn only_series<'a>(outcome: &'a ScanOutcome, key: &str) -> &'a Entity {
    let study = outcome
        .studies
        .get(&(STUDY_UID.to_string(), PATIENT.to_string()))
        .expect("study should exist");
    study
        .get(key)
        .unwrap_or_else(|| panic!("series {:?} not in {:?}", key, study.keys().collect::<Vec<_>>()))
}

fn tally<'a>(outcome: &'a ScanOutcome, reason: &str) -> usize {
    outcome
        .report
        .errors
        .iter()
        .find(|t| t.reason == reason)
        .map(|t| t.count)
        .unwrap_or(0)
}

#[test]
fn single_axial_volume() {
    let files: Vec<DicomFile> = (0..30)
        .map(|k| {
            dicom_file(
                &format!("f{:03}.dcm", k),
                slice_dataset("001", k + 1, k as f64 * 2.0),
            )
        })
        .collect();

    let outcome = scan(files, ScanOptions::default());

    let e = only_series(&outcome, "001");
    assert_eq!(e.slices.len(), 30);
    assert_eq!(e.shape, (64, 64));
    assert_eq!(e.res, [0.9375, 0.9375, 2.0]);
    assert_eq!(e.orient.len(), 1);
    assert_eq!(e.echoes.iter().copied().collect::<Vec<_>>(), [1]);

    // no temporal tag: instance numbers were collapsed to a single volume
    assert_eq!(e.times.iter().cloned().collect::<Vec<_>>(), ["0"]);
    assert!(e.missing.values().all(|&m| m == 0));

    // every plane key appears in all parallel maps
    for key in e.file.keys() {
        assert!(e.end.contains_key(key));
        assert!(e.pixels.contains_key(key));
        assert!(e.rescale.contains_key(key));
        assert!(e.mosaic.contains_key(key));
        assert!(e.dtimes.contains_key(key));
        assert!(e.descrip.contains_key(key));
    }

    // slice positions survived
    let first = e.slicesd.get(&OrderedFloat(0.0)).unwrap();
    assert_eq!(*first, [-110.0, -110.0, 0.0]);
    let last = e.slicesd.get(&OrderedFloat(58.0)).unwrap();
    assert_eq!(*last, [-110.0, -110.0, 58.0]);
}

#[test]
fn two_orientations_get_anatomical_names() {
    let mut files = Vec::new();
    for k in 0..4 {
        files.push(dicom_file(
            &format!("axi{}.dcm", k),
            slice_dataset("7", k + 1, k as f64 * 2.0),
        ));
    }
    for k in 0..4 {
        let mut ds = slice_dataset("7", k + 5, k as f64 * 2.0);
        put_strs(
            &mut ds,
            Tag(0x0020, 0x0037),
            VR::DS,
            &["1", "0", "0", "0", "0", "-1"],
        );
        files.push(dicom_file(&format!("cor{}.dcm", k), ds));
    }

    let outcome = scan(files, ScanOptions::default());
    let study = outcome
        .studies
        .get(&(STUDY_UID.to_string(), PATIENT.to_string()))
        .unwrap();
    let keys: Vec<&String> = study.keys().collect();
    assert_eq!(keys, ["7axi", "7cor"], "got series {:?}", keys);
    assert_eq!(only_series(&outcome, "7axi").slices.len(), 4);
    assert_eq!(only_series(&outcome, "7cor").slices.len(), 4);
}

#[test]
fn colliding_short_names_fall_back_to_letters() {
    // both blocks classify as axial, so short naming cannot be used
    let five = (5.0f64).to_radians();
    let tilted = [
        format!("{}", five.cos()),
        "0".to_string(),
        format!("{}", five.sin()),
        "0".to_string(),
        "1".to_string(),
        "0".to_string(),
    ];
    let tilted_refs: Vec<&str> = tilted.iter().map(String::as_str).collect();

    let mut files = Vec::new();
    for k in 0..3 {
        files.push(dicom_file(
            &format!("a{}.dcm", k),
            slice_dataset("12", k + 1, k as f64 * 2.0),
        ));
    }
    for k in 0..3 {
        let mut ds = slice_dataset("12", k + 4, k as f64 * 2.0);
        put_strs(&mut ds, Tag(0x0020, 0x0037), VR::DS, &tilted_refs);
        files.push(dicom_file(&format!("b{}.dcm", k), ds));
    }

    let outcome = scan(files, ScanOptions::default());
    let study = outcome
        .studies
        .get(&(STUDY_UID.to_string(), PATIENT.to_string()))
        .unwrap();
    let keys: Vec<&String> = study.keys().collect();
    assert_eq!(keys, ["12a", "12b"], "got series {:?}", keys);
}

#[test]
fn rounding_merges_below_threshold_only() {
    let rotated = |deg: f64| -> Vec<String> {
        let r = deg.to_radians();
        vec![
            format!("{:.9}", r.cos()),
            format!("{:.9}", r.sin()),
            "0".to_string(),
            format!("{:.9}", -r.sin()),
            format!("{:.9}", r.cos()),
            "0".to_string(),
        ]
    };

    // 0.15 degrees: merged into one sub-series
    let mut files = vec![dicom_file("exact.dcm", slice_dataset("5", 1, 0.0))];
    {
        let parts = rotated(0.15);
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let mut ds = slice_dataset("5", 2, 2.0);
        put_strs(&mut ds, Tag(0x0020, 0x0037), VR::DS, &refs);
        files.push(dicom_file("near.dcm", ds));
    }
    let outcome = scan(files, ScanOptions::default());
    let e = only_series(&outcome, "5");
    assert_eq!(e.slices.len(), 2);
    assert_eq!(e.orient.len(), 1, "orientations should have merged");

    // 0.25 degrees: kept separate (and close enough to warn)
    let mut files = vec![dicom_file("exact.dcm", slice_dataset("5", 1, 0.0))];
    {
        let parts = rotated(0.25);
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        let mut ds = slice_dataset("5", 2, 2.0);
        put_strs(&mut ds, Tag(0x0020, 0x0037), VR::DS, &refs);
        files.push(dicom_file("far.dcm", ds));
    }
    let outcome = scan(files, ScanOptions::default());
    let study = outcome
        .studies
        .get(&(STUDY_UID.to_string(), PATIENT.to_string()))
        .unwrap();
    assert_eq!(study.len(), 2, "got series {:?}", study.keys().collect::<Vec<_>>());
    assert!(tally(&outcome, "orientation merge had near miss (< 2*threshold)") > 0);
}

#[test]
fn dynamic_volumes_from_instance_numbers() {
    // 10 slices x 5 time points, no temporal tag
    let mut files = Vec::new();
    for t in 0..5i64 {
        for s in 0..10i64 {
            files.push(dicom_file(
                &format!("t{}s{}.dcm", t, s),
                slice_dataset("20", t * 10 + s + 1, s as f64 * 2.0),
            ));
        }
    }

    let outcome = scan(files, ScanOptions::default());
    let e = only_series(&outcome, "20");

    assert_eq!(e.slices.len(), 10);
    assert_eq!(
        e.sorted_times(),
        ["0", "1", "2", "3", "4"],
        "reconstructed times"
    );
    for t in 0..5 {
        let count = e
            .file
            .keys()
            .filter(|(_, time, _)| time == &t.to_string())
            .count();
        assert_eq!(count, 10, "time {} should hold 10 planes", t);
    }
    assert!(e.missing.values().all(|&m| m == 0));
    assert_eq!(tally(&outcome, "guessing times from instance numbers"), 50);
}

/// build a one-field CSA2 blob
fn csa_blob(name: &str, items: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"SV10");
    out.extend_from_slice(&[4, 3, 2, 1]);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&77u32.to_le_bytes());

    let mut name_bytes = [0u8; 64];
    name_bytes[..name.len()].copy_from_slice(name.as_bytes());
    out.extend_from_slice(&name_bytes);
    out.extend_from_slice(&1i32.to_le_bytes());
    out.extend_from_slice(b"IS\0\0");
    out.extend_from_slice(&6i32.to_le_bytes());
    out.extend_from_slice(&(items.len() as i32).to_le_bytes());
    out.extend_from_slice(&77u32.to_le_bytes());

    for item in items {
        let len = item.len() as i32;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&77i32.to_le_bytes());
        out.extend_from_slice(item.as_bytes());
        let pad = (4 - (item.len() % 4)) % 4;
        out.extend_from_slice(&vec![0u8; pad]);
    }
    out
}

#[test]
fn mosaic_fans_out_into_slices() {
    let mut ds = slice_dataset("30", 1, 0.0);
    put_u16(&mut ds, Tag(0x0028, 0x0010), 384);
    put_u16(&mut ds, Tag(0x0028, 0x0011), 384);
    put_strs(&mut ds, Tag(0x0028, 0x0030), VR::DS, &["1.0", "1.0"]);
    put_str(&mut ds, Tag(0x0018, 0x0088), VR::DS, "3.0");
    ds.put(Element::new(
        Tag(0x0029, 0x1010),
        VR::OB,
        Value::Csa(csa_blob("NumberOfImagesInMosaic", &["36"])),
    ));
    ds.put(Element::new(
        Tag(0x7FE0, 0x0010),
        VR::OW,
        Value::PixelLocator {
            offset: 512,
            length: 384 * 384 * 2,
        },
    ));

    let outcome = scan(vec![dicom_file("mosaic.dcm", ds)], ScanOptions::default());
    let e = only_series(&outcome, "30");

    assert_eq!(e.shape, (64, 64));
    assert_eq!(e.slices.len(), 36);

    // monotone slice indices differing by the slice spacing
    let indices: Vec<f64> = e.slices.iter().map(|s| s.into_inner()).collect();
    for (n, idx) in indices.iter().enumerate() {
        assert!((idx - 3.0 * n as f64).abs() < 1e-9);
    }

    // corner correction: mosaic corner -> first tile corner
    let first = e.slicesd.get(&OrderedFloat(0.0)).unwrap();
    assert_eq!(*first, [-110.0 + 160.0, -110.0 + 160.0, 0.0]);
    let fifth = e.slicesd.get(&OrderedFloat(12.0)).unwrap();
    assert_eq!(*fifth, [50.0, 50.0, 12.0]);

    // tile bookkeeping
    let key = e
        .file
        .keys()
        .find(|(s, _, _)| (s.into_inner() - 21.0).abs() < 1e-9)
        .cloned()
        .expect("tile 7 present");
    let tile = e.mosaic.get(&key).unwrap().as_ref().unwrap();
    assert_eq!(tile.n, 7);
    assert_eq!(tile.rpos, 1);
    assert_eq!(tile.cpos, 1);
    assert_eq!(tile.mrows, 384);

    assert!(tally(&outcome, "mosaic is not standards-based, beware geometry") > 0);
}

#[test]
fn missing_slice_is_counted() {
    let mut files = Vec::new();
    for t in 1..=2i64 {
        for s in 0..3i64 {
            if t == 2 && s == 2 {
                continue;
            }
            let mut ds = slice_dataset("40", (t - 1) * 3 + s + 1, s as f64 * 2.0);
            put_str(&mut ds, Tag(0x0020, 0x0100), VR::IS, &t.to_string());
            files.push(dicom_file(&format!("t{}s{}.dcm", t, s), ds));
        }
    }

    let outcome = scan(files, ScanOptions::default());
    let e = only_series(&outcome, "40");
    assert_eq!(e.slices.len(), 3);
    assert_eq!(e.missing.get(&("1".to_string(), 1)), Some(&0));
    assert_eq!(e.missing.get(&("2".to_string(), 1)), Some(&1));
    assert!(tally(&outcome, "missing slices in volumes generated from series") > 0);
}

#[test]
fn single_collapses_studies() {
    let mut a = slice_dataset("3", 1, 0.0);
    put_str(&mut a, Tag(0x0020, 0x000D), VR::UI, "1.1.1");
    let mut b = slice_dataset("4", 2, 2.0);
    put_str(&mut b, Tag(0x0020, 0x000D), VR::UI, "2.2.2");

    let opts = ScanOptions {
        single: true,
        ..Default::default()
    };
    let outcome = scan(
        vec![dicom_file("a.dcm", a), dicom_file("b.dcm", b)],
        opts,
    );

    assert_eq!(outcome.studies.len(), 1);
    let (study_key, series_map) = outcome.studies.iter().next().unwrap();
    assert_eq!(study_key.0, "1.1.1_S");
    assert_eq!(study_key.1, format!("{}_S", PATIENT));
    // all files were forced into one synthetic series
    assert_eq!(series_map.len(), 1);
    assert!(series_map.contains_key("3S"));
    assert_eq!(series_map["3S"].slices.len(), 2);
}

#[test]
fn description_filters_skip_files() {
    let opts = ScanOptions {
        seq_exclude: Some(regex::Regex::new("t1_").unwrap()),
        ..Default::default()
    };
    let outcome = scan(
        vec![dicom_file("x.dcm", slice_dataset("1", 1, 0.0))],
        opts,
    );
    assert!(outcome.studies.is_empty());
    assert_eq!(
        tally(&outcome, "description matched exclude pattern, skipping file"),
        1
    );
}

#[test]
fn unknown_geometry_goes_to_unk_subseries() {
    let mut ds = slice_dataset("9", 5, 0.0);
    ds.take(Tag(0x0020, 0x0032));
    ds.take(Tag(0x0020, 0x0037));
    ds.take(Tag(0x0020, 0x1041));

    // without --stack-unk the file is skipped
    let outcome = scan(
        vec![ds.clone_into_file()],
        ScanOptions::default(),
    );
    assert!(outcome.studies.is_empty());
    assert_eq!(tally(&outcome, "no geometry, no --stack-unk, skipping file"), 1);

    // with --stack-unk it lands in the `unk` sub-series with a warning
    let opts = ScanOptions {
        stackunk: true,
        ..Default::default()
    };
    let outcome = scan(vec![ds.clone_into_file()], opts);
    let e = only_series(&outcome, "9unk");
    assert_eq!(e.slices.len(), 1);
    assert!(e.slices.contains(&OrderedFloat(5.0)));
    assert_eq!(tally(&outcome, "unknown geometry, using naive stacking"), 1);
}

trait IntoFile {
    fn clone_into_file(&self) -> DicomFile;
}

impl IntoFile for Dataset {
    fn clone_into_file(&self) -> DicomFile {
        DicomFile {
            path: PathBuf::from("u.dcm"),
            dataset: self.clone(),
            endianness: Endianness::Little,
        }
    }
}
