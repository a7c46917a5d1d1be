//! Data dictionary interface.
//!
//! The concrete dictionary (the embedded standard attribute table) lives in
//! the `voxconv-dictionary-std` crate; this module only declares the lookup
//! contract so that data sets can be addressed by attribute short names
//! without a dependency cycle.

use crate::header::{Tag, VR};

/// A dictionary entry for a single attribute.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct DictionaryEntry {
    /// the attribute tag
    pub tag: Tag,
    /// the typical value representation
    pub vr: VR,
    /// the value multiplicity, as written in the standard
    /// (`"1"`, `"3"`, `"1-n"`, `"2-2n"`, ...)
    pub vm: &'static str,
    /// the full attribute name
    pub name: &'static str,
}

/// Type trait for a dictionary of DICOM attributes,
/// queried by tag or by normalized short name.
pub trait DataDictionary {
    /// Fetch the entry for the given tag.
    fn by_tag(&self, tag: Tag) -> Option<&DictionaryEntry>;

    /// Fetch the entry with the given short name
    /// (for example `"image_position_patient"`).
    fn by_name(&self, name: &str) -> Option<&DictionaryEntry>;

    /// The typical VR of the given tag, if known.
    fn vr_of(&self, tag: Tag) -> Option<VR> {
        self.by_tag(tag).map(|e| e.vr)
    }

    /// The value multiplicity string of the given tag, if known.
    fn vm_of(&self, tag: Tag) -> Option<&'static str> {
        self.by_tag(tag).map(|e| e.vm)
    }
}

impl<T: DataDictionary + ?Sized> DataDictionary for &T {
    fn by_tag(&self, tag: Tag) -> Option<&DictionaryEntry> {
        (**self).by_tag(tag)
    }

    fn by_name(&self, name: &str) -> Option<&DictionaryEntry> {
        (**self).by_name(name)
    }
}
