//! Decoder for the Siemens CSA2 (`SV10`) private header format.
//!
//! The blob is carried inside DICOM tags (0029,1010) and (0029,1020) and
//! holds named fields with string items; the converter pulls the mosaic
//! tile count, diffusion vector, B value, SAR and phase encoding data from
//! here. A blob that does not start with the `SV10` magic decodes to an
//! empty header rather than an error.

use byteordered::ByteOrdered;
use snafu::{OptionExt, Snafu};
use std::collections::HashMap;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("CSA blob truncated while reading {}", what))]
    Truncated { what: &'static str },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// One named CSA field with its live items.
///
/// Items whose subheader announces a zero length are suppressed at decode
/// time; `items` holds only the live values.
#[derive(Debug, Clone, PartialEq)]
pub struct CsaField {
    /// field name, NUL-trimmed
    pub name: String,
    /// value multiplicity as recorded in the blob
    pub vm: i32,
    /// value representation, NUL-trimmed
    pub vr: String,
    /// the syngo data type code
    pub syngodt: i32,
    /// live item values
    pub items: Vec<String>,
}

/// A decoded CSA2 header: named fields in no particular order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsaHeader {
    fields: HashMap<String, CsaField>,
}

impl CsaHeader {
    /// Fetch a field by name.
    pub fn field(&self, name: &str) -> Option<&CsaField> {
        self.fields.get(name)
    }

    /// The live item values of the named field; empty when absent.
    pub fn values(&self, name: &str) -> &[String] {
        self.fields
            .get(name)
            .map(|f| f.items.as_slice())
            .unwrap_or(&[])
    }

    /// The first live item of the named field.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// Number of decoded fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields were decoded (bad magic or empty blob).
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Decode a CSA2 blob.
pub fn parse_csa(blob: &[u8]) -> Result<CsaHeader> {
    let mut header = CsaHeader::default();

    if blob.len() < 16 || &blob[0..4] != b"SV10" {
        return Ok(header);
    }

    // 4 magic bytes, 4 unused, field count, 4 unused
    let n = {
        let mut rd = ByteOrdered::le(&blob[8..12]);
        rd.read_u32().ok().context(TruncatedSnafu {
            what: "field count",
        })?
    };
    let mut cursor = Cursor {
        blob,
        position: 16,
    };

    for _ in 0..n {
        let name_bytes = cursor.take(64, "field name")?;
        let name_len = name_bytes.iter().position(|&b| b == 0).unwrap_or(64);
        let name = String::from_utf8_lossy(&name_bytes[..name_len]).into_owned();

        let vm = cursor.take_i32("vm")?;
        let vr_bytes = cursor.take(4, "vr")?;
        let vr_len = vr_bytes.iter().position(|&b| b == 0).unwrap_or(4);
        let vr = String::from_utf8_lossy(&vr_bytes[..vr_len]).into_owned();
        let syngodt = cursor.take_i32("syngodt")?;
        let item_count = cursor.take_i32("item count")?;
        cursor.take(4, "field padding")?;

        let mut items = Vec::new();
        for _ in 0..item_count.max(0) {
            let a = cursor.take_i32("item subheader")?;
            let b = cursor.take_i32("item subheader")?;
            let _c = cursor.take_i32("item subheader")?;
            let _d = cursor.take_i32("item subheader")?;

            let len = b.max(0) as usize;
            let raw = cursor.take(len, "item value")?;
            // value runs to the first NUL, then trailing spaces are dropped
            let cut = raw.iter().position(|&x| x == 0).unwrap_or(len);
            let value = String::from_utf8_lossy(&raw[..cut]);
            let value = value.trim_end_matches(' ').to_string();

            // skip up to the next 4-byte boundary
            let pad = (4 - (len % 4)) % 4;
            cursor.skip(pad, "item padding")?;

            if a > 0 {
                items.push(value);
            }
        }

        header.fields.insert(
            name.clone(),
            CsaField {
                name,
                vm,
                vr,
                syngodt,
                items,
            },
        );
    }

    Ok(header)
}

struct Cursor<'a> {
    blob: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize, what: &'static str) -> Result<&'a [u8]> {
        let end = self
            .position
            .checked_add(len)
            .context(TruncatedSnafu { what })?;
        let slice = self.blob.get(self.position..end).context(TruncatedSnafu { what })?;
        self.position = end;
        Ok(slice)
    }

    fn take_i32(&mut self, what: &'static str) -> Result<i32> {
        let raw = self.take(4, what)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn skip(&mut self, len: usize, what: &'static str) -> Result<()> {
        self.take(len, what).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// build a CSA2 blob with the documented layout
    fn encode(fields: &[(&str, i32, &str, i32, &[(i32, &str)])]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"SV10");
        out.extend_from_slice(&[4, 3, 2, 1]);
        out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
        out.extend_from_slice(&77u32.to_le_bytes());

        for &(name, vm, vr, syngodt, items) in fields {
            let mut name_bytes = [0u8; 64];
            name_bytes[..name.len()].copy_from_slice(name.as_bytes());
            out.extend_from_slice(&name_bytes);
            out.extend_from_slice(&vm.to_le_bytes());
            let mut vr_bytes = [0u8; 4];
            vr_bytes[..vr.len()].copy_from_slice(vr.as_bytes());
            out.extend_from_slice(&vr_bytes);
            out.extend_from_slice(&syngodt.to_le_bytes());
            out.extend_from_slice(&(items.len() as i32).to_le_bytes());
            out.extend_from_slice(&77u32.to_le_bytes());

            for &(live, value) in items {
                let len = value.len() as i32;
                out.extend_from_slice(&live.to_le_bytes());
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(&77i32.to_le_bytes());
                out.extend_from_slice(value.as_bytes());
                let pad = (4 - (value.len() % 4)) % 4;
                out.extend_from_slice(&vec![0u8; pad]);
            }
        }
        out
    }

    #[test]
    fn bad_magic_is_empty_not_error() {
        let header = parse_csa(b"NOPE----------------").unwrap();
        assert!(header.is_empty());

        let header = parse_csa(b"").unwrap();
        assert!(header.is_empty());
    }

    #[test]
    fn decodes_named_fields() {
        let blob = encode(&[
            ("NumberOfImagesInMosaic", 1, "IS", 6, &[(1, "36")]),
            (
                "DiffusionGradientDirection",
                3,
                "FD",
                4,
                &[(1, "0.5"), (1, "0.5"), (1, "0.7071")],
            ),
            ("B_value", 1, "IS", 6, &[(1, "1000")]),
        ]);

        let header = parse_csa(&blob).unwrap();
        assert_eq!(header.len(), 3);
        assert_eq!(header.first("NumberOfImagesInMosaic"), Some("36"));
        assert_eq!(
            header.values("DiffusionGradientDirection"),
            &["0.5", "0.5", "0.7071"]
        );
        let field = header.field("B_value").unwrap();
        assert_eq!(field.vm, 1);
        assert_eq!(field.vr, "IS");
        assert_eq!(field.syngodt, 6);
    }

    #[test]
    fn zero_length_subheaders_are_suppressed() {
        let blob = encode(&[(
            "PhaseEncodingDirectionPositive",
            1,
            "IS",
            6,
            &[(0, ""), (1, "1")],
        )]);
        let header = parse_csa(&blob).unwrap();
        assert_eq!(header.values("PhaseEncodingDirectionPositive"), &["1"]);
    }

    #[test]
    fn values_are_nul_cut_and_space_trimmed() {
        let blob = encode(&[("ImaCoilString", 1, "LO", 19, &[(1, "HEA \0junk")])]);
        let header = parse_csa(&blob).unwrap();
        assert_eq!(header.first("ImaCoilString"), Some("HEA"));
    }

    #[test]
    fn reencoding_is_idempotent() {
        let blob = encode(&[
            ("Alpha", 1, "IS", 6, &[(1, "1"), (1, "22"), (1, "333")]),
            ("Beta", 2, "DS", 4, &[(1, "0.25")]),
        ]);
        let first = parse_csa(&blob).unwrap();

        // re-encode from the decoded form and parse again
        let fields: Vec<(String, i32, String, i32, Vec<(i32, String)>)> = {
            let mut names: Vec<_> = ["Alpha", "Beta"].to_vec();
            names.sort_unstable();
            names
                .iter()
                .map(|n| {
                    let f = first.field(n).unwrap();
                    (
                        f.name.clone(),
                        f.vm,
                        f.vr.clone(),
                        f.syngodt,
                        f.items.iter().map(|i| (1, i.clone())).collect(),
                    )
                })
                .collect()
        };
        let borrowed: Vec<(&str, i32, &str, i32, Vec<(i32, &str)>)> = fields
            .iter()
            .map(|(n, vm, vr, s, items)| {
                (
                    n.as_str(),
                    *vm,
                    vr.as_str(),
                    *s,
                    items.iter().map(|(l, v)| (*l, v.as_str())).collect(),
                )
            })
            .collect();
        let slices: Vec<(&str, i32, &str, i32, &[(i32, &str)])> = borrowed
            .iter()
            .map(|(n, vm, vr, s, items)| (*n, *vm, *vr, *s, items.as_slice()))
            .collect();
        let second = parse_csa(&encode(&slices)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn truncated_blob_is_an_error() {
        let mut blob = encode(&[("NumberOfImagesInMosaic", 1, "IS", 6, &[(1, "36")])]);
        blob.truncate(40);
        assert!(parse_csa(&blob).is_err());
    }
}
