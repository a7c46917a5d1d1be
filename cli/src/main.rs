//! Batch conversion driver: walk the input, assemble series, stack each
//! volume, and write NIfTI-1 or GIPL files plus the optional sidecar.

use clap::Parser;
use regex::Regex;
use snafu::{Report, ResultExt, Snafu};
use std::io::Write as _;
use std::path::PathBuf;
use tracing::Level;

use voxconv_assemble::entity::Entity;
use voxconv_assemble::index::IndexBuilder;
use voxconv_assemble::matcher::{expand_template, MatcherError, NameMatcher};
use voxconv_assemble::orient::GeometryError;
use voxconv_assemble::scan::{collect_files, ScanOptions, ScanOutcome, Scanner};
use voxconv_assemble::stack::{build_volume, StackError};
use voxconv_assemble::util::{fixser, tidy_protoname};
use voxconv_assemble::{with_volume, Geometry, Plane};
use voxconv_nifti::{GiplWriter, NiiWriter};

/// Geometry-aware converter from DICOM series to NIfTI-1/GIPL volumes
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// Files or directories to convert
    #[arg(required = true)]
    input: Vec<PathBuf>,

    /// Output directory (created if missing)
    #[arg(short = 'd', long = "dir", default_value = ".")]
    output_dir: PathBuf,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "nii")]
    format: OutputFormat,

    /// Compress output volumes with gzip
    #[arg(short = 'z', long = "gzip")]
    gzip: bool,

    /// List the assembled series without converting
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Write an index.json sidecar into the output directory
    #[arg(long = "index")]
    index: bool,

    /// Alias/name-template configuration file
    #[arg(short = 'm', long = "match")]
    match_config: Option<PathBuf>,

    /// Replace the patient name in the sidecar
    #[arg(long = "anon")]
    anon: Option<String>,

    /// Regex filter applied to input paths
    #[arg(long = "path-match")]
    path_match: Option<String>,

    /// Include regex on the protocol description
    #[arg(long = "seq-inc")]
    seq_inc: Option<String>,

    /// Exclude regex on the protocol description
    #[arg(long = "seq-exc")]
    seq_exc: Option<String>,

    /// Include literal on an ImageType component
    #[arg(long = "type-inc", default_value = "")]
    type_inc: String,

    /// Exclude literal on an ImageType component
    #[arg(long = "type-exc", default_value = "")]
    type_exc: String,

    /// Skip the Siemens CSA headers (faster, less accurate mosaic and
    /// diffusion detection)
    #[arg(long = "no-csa")]
    no_csa: bool,

    /// Enable ACR-NEMA fallback parsing
    #[arg(long = "acr")]
    acr: bool,

    /// Flatten sequence contents while reading
    #[arg(long = "flat")]
    flat: bool,

    /// Force all files into one synthetic study/name/series
    #[arg(long = "single")]
    single: bool,

    /// Force mosaic unpacking with this many tiles
    #[arg(long = "mosaic")]
    mosaic: Option<u32>,

    /// Sort slices by projection of their position onto the slice normal
    #[arg(long = "slice-3d")]
    slice3d: bool,

    /// Use the instance number as the slice index
    #[arg(long = "slice-inst")]
    sliceinst: bool,

    /// Accept and naively stack files lacking orientation/position
    #[arg(long = "stack-unk")]
    stackunk: bool,

    /// Keep series with differing orientations in one volume
    #[arg(long = "no-split-orient")]
    no_split_orient: bool,

    /// Disable orientation rounding
    #[arg(long = "no-round-orient")]
    no_round_orient: bool,

    /// Orientation rounding threshold in degrees
    #[arg(long = "round-thresh", default_value_t = 0.2)]
    round_thresh: f64,

    /// Always name sub-series z0000, z0001, ...
    #[arg(long = "n-subseries")]
    n_subseries: bool,

    /// Extract SAR fields from the CSA series header
    #[arg(long = "sar")]
    sar: bool,

    /// Extract the phase-encoding direction
    #[arg(long = "phase")]
    phase: bool,

    /// Accepted for compatibility; has no effect
    #[arg(long = "timehack")]
    timehack: bool,

    /// Re-orient output volumes to the axial plane where supported
    #[arg(long = "reorient")]
    reorient: bool,

    /// Flip output volumes along the row axis
    #[arg(long = "flip-h")]
    flip_h: bool,

    /// Flip output volumes along the column axis
    #[arg(long = "flip-v")]
    flip_v: bool,

    /// Pad unused dim/pixdim slots and scl fields with ones
    #[arg(long = "one-padding")]
    one_padding: bool,

    /// Print more information while converting
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Nii,
    Gipl,
}

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("bad regex {:?}", pattern))]
    BadRegex {
        pattern: String,
        source: regex::Error,
    },

    /// could not load matcher configuration
    Matcher { source: MatcherError },

    #[snafu(display("could not create output directory {}", path.display()))]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("could not stack volume {}", name))]
    Stack { name: String, source: StackError },

    #[snafu(display("bad geometry in volume {}", name))]
    Geometry {
        name: String,
        source: GeometryError,
    },

    #[snafu(display("could not write {}", path.display()))]
    WriteNii {
        path: PathBuf,
        source: voxconv_nifti::nii::Error,
    },

    #[snafu(display("could not write {}", path.display()))]
    WriteGipl {
        path: PathBuf,
        source: voxconv_nifti::gipl::Error,
    },

    #[snafu(display("could not write index {}", path.display()))]
    WriteIndex {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    fn to_exit_code(&self) -> i32 {
        match self {
            Error::BadRegex { .. } | Error::Matcher { .. } => -1,
            Error::Stack { .. } | Error::Geometry { .. } => -2,
            Error::OutputDir { .. }
            | Error::WriteNii { .. }
            | Error::WriteGipl { .. }
            | Error::WriteIndex { .. } => -4,
        }
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

fn main() {
    let args = App::parse();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("[WARN] could not set up logging subscriber");
    }

    run(args).unwrap_or_else(|e| {
        let code = e.to_exit_code();
        eprintln!("{}", Report::from_error(e));
        std::process::exit(code);
    });
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn compile(pattern: Option<&str>) -> Result<Option<Regex>> {
    match pattern {
        None => Ok(None),
        Some(p) => Regex::new(p)
            .map(Some)
            .context(BadRegexSnafu { pattern: p }),
    }
}

fn run(args: App) -> Result<()> {
    let opts = ScanOptions {
        flat: args.flat,
        acr: args.acr,
        csa: !args.no_csa,
        splitorient: !args.no_split_orient,
        roundorient: !args.no_round_orient,
        roundorientthresh: args.round_thresh,
        nsubseries: args.n_subseries,
        single: args.single,
        mosaic: args.mosaic,
        slice3d: args.slice3d,
        sliceinst: args.sliceinst,
        stackunk: args.stackunk,
        sar: args.sar,
        phase: args.phase,
        timehack: args.timehack,
        seq_include: compile(args.seq_inc.as_deref())?,
        seq_exclude: compile(args.seq_exc.as_deref())?,
        type_include: args.type_inc.clone(),
        type_exclude: args.type_exc.clone(),
    };
    let path_filter = compile(args.path_match.as_deref())?;

    let files = collect_files(&args.input, path_filter.as_ref());
    let total = files.len();

    let mut scanner = Scanner::new(opts);
    for file in &files {
        scanner.ingest_path(file);
        let (seen, warnings) = scanner.progress();
        eprint!(
            "\rReading: {}/{} ({} warning{})  ",
            seen,
            total,
            warnings,
            plural(warnings)
        );
        let _ = std::io::stderr().flush();
    }
    let outcome = scanner.finish();
    eprintln!(
        "\rRead: {}/{} ({} warning{})     ",
        outcome.report.files_seen,
        total,
        outcome.report.warning_count,
        plural(outcome.report.warning_count)
    );
    for tally in &outcome.report.errors {
        eprintln!(
            "Warning: {} (repeated {} time{})",
            tally.reason,
            tally.count,
            plural(tally.count)
        );
        eprintln!("     eg: {}", tally.exemplar.display());
    }

    let matcher = match &args.match_config {
        None => None,
        Some(path) => {
            let mut matcher = NameMatcher::from_path(path).context(MatcherSnafu)?;
            matcher.find_matches(&outcome.studies).context(MatcherSnafu)?;
            Some(matcher)
        }
    };

    if args.list {
        list_series(&outcome, matcher.as_ref());
        return Ok(());
    }

    std::fs::create_dir_all(&args.output_dir).context(OutputDirSnafu {
        path: args.output_dir.clone(),
    })?;

    let mut index = IndexBuilder::new();
    index.change_name = args.anon.clone();

    for ((study_id, patient), series_map) in &outcome.studies {
        let mut keys: Vec<&String> = series_map.keys().collect();
        keys.sort_by_key(|k| fixser(k));

        for serk in keys {
            let entity = &series_map[serk];
            let times = entity.sorted_times();
            let echoes: Vec<i32> = entity.echoes.iter().copied().collect();

            for (ti, time) in times.iter().enumerate() {
                for echo in &echoes {
                    convert_volume(
                        &args,
                        &mut index,
                        matcher.as_ref(),
                        study_id,
                        patient,
                        serk,
                        entity,
                        time,
                        ti,
                        times.len(),
                        *echo,
                        echoes.len(),
                    )?;
                }
            }
        }
    }

    if args.index {
        let path = args.output_dir.join("index.json");
        std::fs::write(&path, index.to_json(&outcome.studies))
            .context(WriteIndexSnafu { path })?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn convert_volume(
    args: &App,
    index: &mut IndexBuilder,
    matcher: Option<&NameMatcher>,
    study_id: &str,
    patient: &str,
    serk: &str,
    entity: &Entity,
    time: &str,
    time_index: usize,
    time_count: usize,
    echo: i32,
    echo_count: usize,
) -> Result<()> {
    let volume_name = format!("{}/{}:{}:{}", study_id, serk, time, echo);

    let mut volume =
        build_volume(entity, time, echo).context(StackSnafu { name: volume_name.clone() })?;

    let adjust: std::result::Result<(), GeometryError> = with_volume!(&mut volume, img => (|| {
        if args.flip_h {
            img.flip_h();
        }
        if args.flip_v {
            img.flip_v();
        }
        if args.reorient && !img.reorient(Plane::Axial)? {
            tracing::debug!("{}: reorientation to axial not supported", volume_name);
        }
        Ok(())
    })());
    adjust.context(GeometrySnafu { name: volume_name.clone() })?;

    let (qfac, qdata) = volume
        .geom()
        .qdata()
        .context(GeometrySnafu { name: volume_name.clone() })?;

    let descrip = entity
        .descrip
        .iter()
        .find(|((_, t, e), _)| t == time && *e == echo)
        .map(|(_, d)| d.clone())
        .unwrap_or_default();

    let stem = output_stem(
        matcher, study_id, patient, serk, entity, time_index, time_count, echo, echo_count,
    );
    let extension = match (args.format, args.gzip) {
        (OutputFormat::Nii, false) => "nii",
        (OutputFormat::Nii, true) => "nii.gz",
        (OutputFormat::Gipl, false) => "gipl",
        (OutputFormat::Gipl, true) => "gipl.gz",
    };
    let filename = format!("{}.{}", stem, extension);
    let path = args.output_dir.join(&filename);

    // naively stacked volumes carry no trustworthy patient transform
    let qform = if serk.ends_with("unk") { 0 } else { 1 };

    match args.format {
        OutputFormat::Nii => {
            let mut writer = NiiWriter::new();
            writer.pixdim = volume.geom().pixdim;
            writer.qfac = qfac;
            writer.qform = qform;
            writer.qdata = qdata;
            writer.descrip = descrip;
            writer.one_padding = args.one_padding;
            writer.gzip = args.gzip;
            with_volume!(&volume, img => writer.write(&path, &img.data))
                .context(WriteNiiSnafu { path: path.clone() })?;
        }
        OutputFormat::Gipl => {
            let geom: &Geometry = volume.geom();
            let mut writer = GiplWriter::new();
            writer.pixdim = [
                geom.pixdim[0] as f32,
                geom.pixdim[1] as f32,
                geom.pixdim[2] as f32,
                1.0,
            ];
            writer.origin = [geom.offset[0], geom.offset[1], geom.offset[2], 0.0];
            writer.descrip = descrip;
            writer.gzip = args.gzip;
            with_volume!(&volume, img => writer.write(&path, &img.data))
                .context(WriteGiplSnafu { path: path.clone() })?;
        }
    }

    tracing::debug!("wrote {}", path.display());

    index.record(
        (study_id.to_string(), patient.to_string(), serk.to_string()),
        volume.geom().axes.clone(),
        filename,
    );
    Ok(())
}

/// The output file stem: the alias template when the matcher has one for
/// this series, a date-free default otherwise.
#[allow(clippy::too_many_arguments)]
fn output_stem(
    matcher: Option<&NameMatcher>,
    study_id: &str,
    patient: &str,
    serk: &str,
    entity: &Entity,
    time_index: usize,
    time_count: usize,
    echo: i32,
    echo_count: usize,
) -> String {
    if let Some(matcher) = matcher {
        if let Some((alias, count)) = matcher.find(study_id, patient, serk) {
            let template = matcher.template(study_id, patient, serk);
            let stem = expand_template(&template, |name| match name {
                "alias" => Some(alias.clone()),
                "count" => count.map(|c| c.to_string()),
                "t" => {
                    if time_count > 1 {
                        Some(format!("{:04}", time_index))
                    } else {
                        None
                    }
                }
                "echo" => {
                    if echo_count > 1 {
                        Some(format!("e{}", echo))
                    } else {
                        None
                    }
                }
                "desc" => Some(tidy_protoname(&entity.desc)),
                "ser" => Some(fixser(serk)),
                "date" => Some(entity.date.clone()),
                "study" => Some(study_id.to_string()),
                "name" => Some(patient.to_string()),
                _ => None,
            });
            if !stem.is_empty() {
                return stem;
            }
        }
    }

    let mut stem = format!("{}-{}", fixser(serk), tidy_protoname(&entity.desc));
    if time_count > 1 {
        stem.push_str(&format!("-{:04}", time_index));
    }
    if echo_count > 1 {
        stem.push_str(&format!("-e{}", echo));
    }
    stem
}

fn list_series(outcome: &ScanOutcome, matcher: Option<&NameMatcher>) {
    for ((study_id, patient), series_map) in &outcome.studies {
        println!("Study: ({}, {})", study_id, patient);
        let mut keys: Vec<&String> = series_map.keys().collect();
        keys.sort_by_key(|k| fixser(k));

        for serk in keys {
            let e = &series_map[serk];
            let orient = Geometry::new(e.res, &e.orient, [0.0; 3], None)
                .map(|g| g.find_orient().long().to_string())
                .unwrap_or_else(|_| "Skewed".to_string());

            let (gaps, gapped) = e.gap_summary();
            let missing = if gapped > 0 {
                format!(" ({}/{} gaps)", gaps, gapped)
            } else {
                String::new()
            };

            let alias = matcher
                .and_then(|m| m.find(study_id, patient, serk))
                .map(|(alias, count)| match count {
                    Some(count) => format!(" {{{}-{}}}", alias, count),
                    None => format!(" {{{}}}", alias),
                })
                .unwrap_or_default();

            println!(
                "  Series: {} -> ({} x {} x {}) {} {} {} [{}] {}{}{}",
                serk,
                e.shape.0,
                e.shape.1,
                e.slices.len(),
                e.times.len(),
                e.echoes.len(),
                orient,
                e.desc.replace(' ', "_"),
                e.image_subtype,
                missing,
                alias
            );
        }
    }
}
