//! The flat DICOM data set resulting from reading one file.

use crate::dictionary::DataDictionary;
use crate::header::{Tag, VR};
use crate::value::Value;
use std::collections::btree_map;
use std::collections::BTreeMap;

/// A data element: a tag, its value representation, and the decoded value.
#[derive(Debug, PartialEq, Clone)]
pub struct Element {
    tag: Tag,
    vr: VR,
    value: Value,
}

impl Element {
    /// Create a data element from its parts. No compatibility check is made
    /// between the VR and the value variant.
    pub fn new(tag: Tag, vr: VR, value: Value) -> Element {
        Element { tag, vr, value }
    }

    /// The element's tag.
    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// The element's value representation.
    pub fn vr(&self) -> VR {
        self.vr
    }

    /// The element's decoded value.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A mapping from attribute tag to data element, with insertion order
/// irrelevant and keys unique per level.
///
/// Elements can be fetched by tag or, through a data dictionary, by
/// normalized short name; both operations are backed by the same storage.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Dataset {
    entries: BTreeMap<Tag, Element>,
}

impl Dataset {
    /// Create an empty data set.
    pub fn new() -> Dataset {
        Dataset::default()
    }

    /// Insert an element, replacing any previous element with the same tag.
    pub fn put(&mut self, elem: Element) {
        self.entries.insert(elem.tag(), elem);
    }

    /// Fetch the element with the given tag.
    pub fn get<T: Into<Tag>>(&self, tag: T) -> Option<&Element> {
        self.entries.get(&tag.into())
    }

    /// Fetch the value of the element with the given tag.
    pub fn value<T: Into<Tag>>(&self, tag: T) -> Option<&Value> {
        self.get(tag).map(Element::value)
    }

    /// Fetch the element with the given dictionary short name.
    pub fn get_name<D: DataDictionary>(&self, dict: D, name: &str) -> Option<&Element> {
        dict.by_name(name).and_then(|e| self.get(e.tag))
    }

    /// Fetch the value of the element with the given dictionary short name.
    pub fn value_name<D: DataDictionary>(&self, dict: D, name: &str) -> Option<&Value> {
        self.get_name(dict, name).map(Element::value)
    }

    /// Whether an element with this tag is present.
    pub fn contains<T: Into<Tag>>(&self, tag: T) -> bool {
        self.entries.contains_key(&tag.into())
    }

    /// Number of elements at this level.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the data set holds no elements.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over the elements in tag order.
    pub fn iter(&self) -> btree_map::Values<'_, Tag, Element> {
        self.entries.values()
    }

    /// Remove the element with the given tag, returning it if present.
    pub fn take<T: Into<Tag>>(&mut self, tag: T) -> Option<Element> {
        self.entries.remove(&tag.into())
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Element;
    type IntoIter = btree_map::Values<'a, Tag, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

impl IntoIterator for Dataset {
    type Item = (Tag, Element);
    type IntoIter = btree_map::IntoIter<Tag, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
