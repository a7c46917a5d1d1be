#![deny(trivial_casts, trivial_numeric_casts, unsafe_code, unstable_features)]

//! Embedded DICOM attribute dictionary.
//!
//! The registry is a process-wide read-only singleton, initialized once on
//! first use; a second initialization is a no-op. It indexes the embedded
//! table by tag and by *short name*: the attribute name lowercased, with
//! whitespace runs collapsed to `_`, any other non-alphanumeric character
//! dropped, and a trailing `(RET)` marker removed. The short-name index is
//! what lets data sets be addressed as `ds.value_name(dict, "pixel_spacing")`.

mod entries;
pub mod tags;

use once_cell::sync::Lazy;
use std::collections::HashMap;
use voxconv_core::dictionary::{DataDictionary, DictionaryEntry};
use voxconv_core::Tag;

pub use entries::ENTRIES;

static DICT: Lazy<StandardDictionaryRegistry> = Lazy::new(init_dictionary);

/// Retrieve a singleton instance of the standard dictionary registry.
///
/// One does not generally have to call this: the unit type
/// [`StandardDictionary`] already provides lazily loaded access.
#[inline]
pub fn registry() -> &'static StandardDictionaryRegistry {
    &DICT
}

/// Normalize an attribute name into its short form.
pub fn short_name(name: &str) -> String {
    let trimmed = name.replace("(RET)", "");
    let trimmed = trimmed.trim();
    let mut out = String::with_capacity(trimmed.len());
    let mut last_was_sep = false;
    for c in trimmed.chars() {
        if c.is_whitespace() {
            if !last_was_sep && !out.is_empty() {
                out.push('_');
                last_was_sep = true;
            }
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        }
        // any other character is dropped without acting as a separator
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// The data struct actually containing the dictionary indexes.
#[derive(Debug)]
pub struct StandardDictionaryRegistry {
    by_tag: HashMap<Tag, &'static DictionaryEntry>,
    by_name: HashMap<String, &'static DictionaryEntry>,
}

impl StandardDictionaryRegistry {
    fn new() -> StandardDictionaryRegistry {
        StandardDictionaryRegistry {
            by_tag: HashMap::with_capacity(entries::ENTRIES.len()),
            by_name: HashMap::with_capacity(entries::ENTRIES.len()),
        }
    }

    fn index(&mut self, entry: &'static DictionaryEntry) -> &mut Self {
        self.by_tag.insert(entry.tag, entry);
        self.by_name.insert(short_name(entry.name), entry);
        self
    }
}

fn init_dictionary() -> StandardDictionaryRegistry {
    let mut registry = StandardDictionaryRegistry::new();
    for entry in entries::ENTRIES {
        registry.index(entry);
    }
    registry
}

/// An attribute dictionary which consults the embedded table.
///
/// The registry is automatically initialized upon the first use.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StandardDictionary;

impl DataDictionary for StandardDictionary {
    fn by_tag(&self, tag: Tag) -> Option<&DictionaryEntry> {
        registry().by_tag.get(&tag).copied()
    }

    fn by_name(&self, name: &str) -> Option<&DictionaryEntry> {
        registry().by_name.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxconv_core::VR;

    #[test]
    fn lookup_by_tag() {
        let e = StandardDictionary.by_tag(Tag(0x0020, 0x0037)).unwrap();
        assert_eq!(e.vr, VR::DS);
        assert_eq!(e.vm, "6");
        assert_eq!(e.name, "Image Orientation (Patient)");
    }

    #[test]
    fn lookup_by_short_name() {
        let e = StandardDictionary.by_name("image_position_patient").unwrap();
        assert_eq!(e.tag, Tag(0x0020, 0x0032));

        let e = StandardDictionary.by_name("slice_thickness").unwrap();
        assert_eq!(e.tag, Tag(0x0018, 0x0050));

        assert!(StandardDictionary.by_name("no_such_attribute").is_none());
    }

    #[test]
    fn short_name_normalization() {
        assert_eq!(short_name("Image Position (Patient)"), "image_position_patient");
        assert_eq!(short_name("In-plane Phase Encoding Direction"), "inplane_phase_encoding_direction");
        assert_eq!(short_name("SAR"), "sar");
        assert_eq!(short_name("Reference Image (RET)"), "reference_image");
    }

    #[test]
    fn repeated_initialization_is_noop() {
        let first: *const _ = registry();
        let second: *const _ = registry();
        assert_eq!(first, second);
    }
}
