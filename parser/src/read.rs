//! The DICOM element reader.
//!
//! Parses one file into a [`Dataset`]: a map of `(group,element)` → value.
//! Handles explicit and implicit VR, byte-order switches announced by the
//! file meta group, nested sequences (optionally flattened into the outer
//! level), pixel data recorded as a file locator rather than loaded, and the
//! two Siemens CSA blobs captured undecoded.

use byteordered::{ByteOrdered, Endianness};
use snafu::{ensure, ResultExt, Snafu};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use voxconv_core::dictionary::DataDictionary;
use voxconv_core::value::C;
use voxconv_core::{Dataset, Element, Tag, Value, VR};
use voxconv_dictionary_std::{tags, StandardDictionary};

/// Transfer syntax UIDs the reader understands.
const TS_IMPLICIT_LE: &str = "1.2.840.10008.1.2";
const TS_EXPLICIT_LE: &str = "1.2.840.10008.1.2.1";
const TS_EXPLICIT_BE: &str = "1.2.840.10008.1.2.2";

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// could not open file
    OpenFile { source: std::io::Error },

    #[snafu(display("{}", if *acr_enabled {
        "not a DICOM or (probably) ACR file"
    } else {
        "not a DICOM file"
    }))]
    NotDicom { acr_enabled: bool },

    #[snafu(display("could not read from source at position {}", position))]
    ReadBytes {
        position: u64,
        source: std::io::Error,
    },

    #[snafu(display("could not move source cursor to position {}", position))]
    SeekSource {
        position: u64,
        source: std::io::Error,
    },

    #[snafu(display("truncated element {} at position {}", tag, position))]
    TruncatedElement { tag: Tag, position: u64 },

    #[snafu(display("unknown VR {:?} in {}, giving up on file", bytes, tag))]
    UnknownVr { tag: Tag, bytes: [u8; 2] },

    #[snafu(display("unhandled TS {:?}, giving up on file", uid))]
    UnhandledTransferSyntax { uid: String },

    #[snafu(display("value length {} of {} is not a multiple of the element width", length, tag))]
    InvalidValueLength { tag: Tag, length: u32 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Options controlling how files are read.
#[derive(Debug, Default, Clone)]
pub struct ReaderOptions {
    /// Promote sequence contents to the outer level,
    /// leaving the literal `"(flattened)"` in place of the sequence value.
    pub flat: bool,
    /// Enable the ACR-NEMA fallback for files without the `DICM` preamble.
    pub acr: bool,
}

/// The outcome of reading one file: the data set plus the byte order the
/// file ended up being read in (which is the byte order of its pixel data).
#[derive(Debug, Clone)]
pub struct DicomFile {
    /// origin of the data set
    pub path: PathBuf,
    /// the parsed elements
    pub dataset: Dataset,
    /// byte order in effect at the end of the read
    pub endianness: Endianness,
}

/// Read the DICOM file at the given path into a data set.
pub fn read_path(path: impl AsRef<Path>, options: &ReaderOptions) -> Result<DicomFile> {
    let path = path.as_ref();
    let file = File::open(path).context(OpenFileSnafu)?;
    let mut reader = DicomReader::new(BufReader::new(file), options.clone());
    let dataset = reader.read_header()?;
    Ok(DicomFile {
        path: path.to_path_buf(),
        dataset,
        endianness: reader.endianness(),
    })
}

/// A stateful reader of one DICOM data stream.
///
/// The endianness and VR explicitness are reader state: a transfer syntax
/// element inside the file meta group *stages* a change, which takes effect
/// once the cursor reaches the end of the meta group (`switch_at`).
#[derive(Debug)]
pub struct DicomReader<R> {
    src: R,
    flat: bool,
    acr: bool,
    endianness: Endianness,
    explicit: bool,
    staged_endianness: Option<Endianness>,
    staged_implicit: bool,
    switch_at: u64,
}

impl<R> DicomReader<R>
where
    R: Read + Seek,
{
    /// Create a new reader over the given source.
    pub fn new(src: R, options: ReaderOptions) -> DicomReader<R> {
        DicomReader {
            src,
            flat: options.flat,
            acr: options.acr,
            endianness: Endianness::Little,
            explicit: true,
            staged_endianness: None,
            staged_implicit: false,
            switch_at: 0,
        }
    }

    /// The byte order currently in effect.
    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Detect the stream format and read all elements into a data set.
    pub fn read_header(&mut self) -> Result<Dataset> {
        if self.check_preamble()? {
            self.seek_to(132)?;
            self.explicit = true;
        } else if self.acr && self.check_acr()? {
            self.seek_to(0)?;
            self.explicit = false;
        } else {
            return NotDicomSnafu {
                acr_enabled: self.acr,
            }
            .fail();
        }
        self.read_fields(None)
    }

    /// Check for the `DICM` magic code at offset 128.
    fn check_preamble(&mut self) -> Result<bool> {
        self.seek_to(128)?;
        let mut magic = [0u8; 4];
        match self.src.read_exact(&mut magic) {
            Ok(()) => Ok(&magic == b"DICM"),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e).context(ReadBytesSnafu { position: 128u64 }),
        }
    }

    /// ACR-NEMA fallback: inspect the first 16-bit word as a little-endian
    /// group number. A small group (1..=8) means implicit little endian; a
    /// byte-swapped small group (0x0100..=0x0800 with a zero low byte) means
    /// implicit big endian. The big-endian arm is a heuristic without a
    /// cited reference; treat it as provisional.
    fn check_acr(&mut self) -> Result<bool> {
        self.seek_to(0)?;
        let mut word = [0u8; 2];
        match self.src.read_exact(&mut word) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e).context(ReadBytesSnafu { position: 0u64 }),
        }
        let group = u16::from_le_bytes(word);
        if (0x0001..=0x0008).contains(&group) {
            return Ok(true);
        }
        if group & 0x00FF == 0 && (0x0100..=0x0800).contains(&group) {
            self.endianness = Endianness::Big;
            return Ok(true);
        }
        Ok(false)
    }

    /// Read elements until the end of the stream, the end of the byte
    /// budget, or a sequence delimiter, whichever comes first.
    fn read_fields(&mut self, budget: Option<u64>) -> Result<Dataset> {
        let start = self.position()?;
        let mut ds = Dataset::new();

        loop {
            let elem_start = self.position()?;

            // staged transfer syntax switches take effect at element
            // boundaries once the cursor has passed the end of group 2
            if elem_start >= self.switch_at {
                if let Some(endianness) = self.staged_endianness.take() {
                    tracing::debug!("switching byte order to {:?} at {}", endianness, elem_start);
                    self.endianness = endianness;
                }
                if self.staged_implicit {
                    tracing::debug!("switching to implicit VR at {}", elem_start);
                    self.explicit = false;
                    self.staged_implicit = false;
                }
            }

            if let Some(max) = budget {
                if elem_start >= start + max {
                    break;
                }
            }

            let tag = match self.read_tag_or_eof(elem_start)? {
                Some(tag) => tag,
                None => break,
            };

            // item/delimiter codes carry a length but no value
            if tag.group() == 0xFFFE {
                self.read_u32()?;
                if tag.element() == 0xE0DD {
                    break;
                }
                continue;
            }

            let (vr, length) = self.read_vr_and_length(tag)?;

            if vr == VR::SQ || length == 0xFFFF_FFFF {
                if length > 0 {
                    let nested_budget = if length == 0xFFFF_FFFF {
                        None
                    } else {
                        Some(u64::from(length))
                    };
                    let nested = self.read_fields(nested_budget)?;
                    if self.flat {
                        for (_, elem) in nested {
                            ds.put(elem);
                        }
                        ds.put(Element::new(tag, vr, Value::from_string("(flattened)")));
                    } else {
                        ds.put(Element::new(tag, vr, Value::Nested(Box::new(nested))));
                    }
                } else {
                    ds.put(Element::new(tag, vr, Value::Nested(Box::new(Dataset::new()))));
                }
                continue;
            }

            if tag == tags::PIXEL_DATA {
                let offset = self.position()?;
                ds.put(Element::new(tag, vr, Value::PixelLocator { offset, length }));
                self.skip(length)?;
                continue;
            }

            if tag == tags::CSA_IMAGE_HEADER || tag == tags::CSA_SERIES_HEADER {
                let blob = self.read_vec(tag, length)?;
                ds.put(Element::new(tag, vr, Value::Csa(blob)));
                continue;
            }

            let raw = self.read_vec(tag, length)?;
            let value = self.convert_value(tag, vr, &raw)?;

            if tag == tags::FILE_META_GROUP_LENGTH {
                if let Some(group_length) = value.as_int() {
                    self.switch_at = elem_start + group_length as u64;
                }
            }

            if tag == tags::TRANSFER_SYNTAX_UID {
                match value.as_str() {
                    Some(TS_IMPLICIT_LE) => self.staged_implicit = true,
                    Some(TS_EXPLICIT_LE) => self.staged_endianness = None,
                    Some(TS_EXPLICIT_BE) => {
                        self.staged_endianness = Some(Endianness::Big);
                    }
                    other => {
                        return UnhandledTransferSyntaxSnafu {
                            uid: other.unwrap_or_default().to_string(),
                        }
                        .fail()
                    }
                }
            }

            ds.put(Element::new(tag, vr, value));
        }

        Ok(ds)
    }

    /// Read the 4 tag bytes, or report a clean end of stream.
    fn read_tag_or_eof(&mut self, position: u64) -> Result<Option<Tag>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self
                .src
                .read(&mut buf[filled..])
                .context(ReadBytesSnafu { position })?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return TruncatedElementSnafu {
                    tag: Tag(0xFFFF, 0xFFFF),
                    position,
                }
                .fail();
            }
            filled += n;
        }
        let (g, e) = match self.endianness {
            Endianness::Little => (
                u16::from_le_bytes([buf[0], buf[1]]),
                u16::from_le_bytes([buf[2], buf[3]]),
            ),
            Endianness::Big => (
                u16::from_be_bytes([buf[0], buf[1]]),
                u16::from_be_bytes([buf[2], buf[3]]),
            ),
        };
        Ok(Some(Tag(g, e)))
    }

    /// Determine the VR and value length, depending on explicitness.
    fn read_vr_and_length(&mut self, tag: Tag) -> Result<(VR, u32)> {
        if !self.explicit {
            let vr = StandardDictionary.vr_of(tag).unwrap_or(VR::UN);
            let length = self.read_u32()?;
            return Ok((vr, length));
        }

        let mut vr_bytes = [0u8; 2];
        let position = self.position()?;
        self.src
            .read_exact(&mut vr_bytes)
            .context(ReadBytesSnafu { position })?;
        let short_length = self.read_u16()?;
        match VR::from_binary(vr_bytes) {
            Some(vr) if vr.has_long_length() => {
                // the 16 bits just read were the reserved pad
                let length = self.read_u32()?;
                Ok((vr, length))
            }
            Some(vr) => Ok((vr, u32::from(short_length))),
            None => UnknownVrSnafu {
                tag,
                bytes: vr_bytes,
            }
            .fail(),
        }
    }

    /// Decode a value field according to its VR.
    fn convert_value(&mut self, tag: Tag, vr: VR, raw: &[u8]) -> Result<Value> {
        if vr.is_text() {
            return Ok(self.convert_text(tag, raw));
        }
        match vr {
            VR::AT | VR::US => self.convert_u16s(tag, raw),
            VR::SS => self.convert_i16s(tag, raw),
            VR::UL => self.convert_u32s(tag, raw),
            VR::SL => self.convert_i32s(tag, raw),
            VR::FL => self.convert_f32s(tag, raw),
            VR::FD => self.convert_f64s(tag, raw),
            // opaque byte values, kept raw
            VR::OB | VR::OW | VR::UN => Ok(Value::Bytes(raw.to_vec())),
            _ => UnknownVrSnafu {
                tag,
                bytes: [0u8; 2],
            }
            .fail(),
        }
    }

    /// Text path: de-pad, then split on backslash up to the dictionary
    /// multiplicity.
    fn convert_text(&mut self, tag: Tag, raw: &[u8]) -> Value {
        let mut s = String::from_utf8_lossy(raw).into_owned();
        let end = s.trim_end().len();
        s.truncate(end);
        if s.len() > 1 && s.len() % 2 == 0 && s.ends_with('\0') {
            s.pop();
        }

        let vm = StandardDictionary.vm_of(tag).unwrap_or("1");
        match max_multiplicity(vm) {
            Some(1) => Value::from_string(s),
            Some(n) => Value::from_strings(s.splitn(n, '\\')),
            None => Value::from_strings(s.split('\\')),
        }
    }

    fn convert_u16s(&mut self, tag: Tag, raw: &[u8]) -> Result<Value> {
        ensure!(raw.len() % 2 == 0, InvalidValueLengthSnafu { tag, length: raw.len() as u32 });
        let mut out = C::with_capacity(raw.len() / 2);
        let mut rd = ByteOrdered::runtime(raw, self.endianness);
        for _ in 0..raw.len() / 2 {
            out.push(rd.read_u16().context(ReadBytesSnafu { position: 0u64 })?);
        }
        Ok(Value::U16s(out))
    }

    fn convert_i16s(&mut self, tag: Tag, raw: &[u8]) -> Result<Value> {
        ensure!(raw.len() % 2 == 0, InvalidValueLengthSnafu { tag, length: raw.len() as u32 });
        let mut out = C::with_capacity(raw.len() / 2);
        let mut rd = ByteOrdered::runtime(raw, self.endianness);
        for _ in 0..raw.len() / 2 {
            out.push(rd.read_i16().context(ReadBytesSnafu { position: 0u64 })?);
        }
        Ok(Value::I16s(out))
    }

    fn convert_u32s(&mut self, tag: Tag, raw: &[u8]) -> Result<Value> {
        ensure!(raw.len() % 4 == 0, InvalidValueLengthSnafu { tag, length: raw.len() as u32 });
        let mut out = C::with_capacity(raw.len() / 4);
        let mut rd = ByteOrdered::runtime(raw, self.endianness);
        for _ in 0..raw.len() / 4 {
            out.push(rd.read_u32().context(ReadBytesSnafu { position: 0u64 })?);
        }
        Ok(Value::U32s(out))
    }

    fn convert_i32s(&mut self, tag: Tag, raw: &[u8]) -> Result<Value> {
        ensure!(raw.len() % 4 == 0, InvalidValueLengthSnafu { tag, length: raw.len() as u32 });
        let mut out = C::with_capacity(raw.len() / 4);
        let mut rd = ByteOrdered::runtime(raw, self.endianness);
        for _ in 0..raw.len() / 4 {
            out.push(rd.read_i32().context(ReadBytesSnafu { position: 0u64 })?);
        }
        Ok(Value::I32s(out))
    }

    fn convert_f32s(&mut self, tag: Tag, raw: &[u8]) -> Result<Value> {
        ensure!(raw.len() % 4 == 0, InvalidValueLengthSnafu { tag, length: raw.len() as u32 });
        let mut out = C::with_capacity(raw.len() / 4);
        let mut rd = ByteOrdered::runtime(raw, self.endianness);
        for _ in 0..raw.len() / 4 {
            out.push(rd.read_f32().context(ReadBytesSnafu { position: 0u64 })?);
        }
        Ok(Value::F32s(out))
    }

    fn convert_f64s(&mut self, tag: Tag, raw: &[u8]) -> Result<Value> {
        ensure!(raw.len() % 8 == 0, InvalidValueLengthSnafu { tag, length: raw.len() as u32 });
        let mut out = C::with_capacity(raw.len() / 8);
        let mut rd = ByteOrdered::runtime(raw, self.endianness);
        for _ in 0..raw.len() / 8 {
            out.push(rd.read_f64().context(ReadBytesSnafu { position: 0u64 })?);
        }
        Ok(Value::F64s(out))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let position = self.position()?;
        ByteOrdered::runtime(&mut self.src, self.endianness)
            .read_u16()
            .context(ReadBytesSnafu { position })
    }

    fn read_u32(&mut self) -> Result<u32> {
        let position = self.position()?;
        ByteOrdered::runtime(&mut self.src, self.endianness)
            .read_u32()
            .context(ReadBytesSnafu { position })
    }

    fn read_vec(&mut self, tag: Tag, length: u32) -> Result<Vec<u8>> {
        let position = self.position()?;
        let mut buf = vec![0u8; length as usize];
        self.src
            .read_exact(&mut buf)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::TruncatedElement { tag, position }
                } else {
                    Error::ReadBytes {
                        position,
                        source: e,
                    }
                }
            })?;
        Ok(buf)
    }

    fn skip(&mut self, length: u32) -> Result<()> {
        let position = self.position()?;
        self.src
            .seek(SeekFrom::Current(i64::from(length)))
            .context(SeekSourceSnafu { position })?;
        Ok(())
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        self.src
            .seek(SeekFrom::Start(position))
            .context(SeekSourceSnafu { position })?;
        Ok(())
    }

    fn position(&mut self) -> Result<u64> {
        self.src
            .stream_position()
            .context(SeekSourceSnafu { position: 0u64 })
    }
}

/// Parse a multiplicity string into the maximum number of value parts.
/// `None` means unbounded (`1-n`, `2-2n`, ...).
fn max_multiplicity(vm: &str) -> Option<usize> {
    let mut parts = vm.splitn(2, '-');
    let first = parts.next().unwrap_or("1");
    match parts.next() {
        // a range: the upper endpoint decides, open means unbounded
        Some(upper) => upper.parse().ok(),
        None => first.parse().ok().or(Some(1)),
    }
}
