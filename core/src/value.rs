//! Decoded element values.
//!
//! Values are stored as uniform lists (text parts, fixed-width numbers) even
//! when the element holds a single part; the scalar accessors unwrap
//! single-element lists, so "a DS with one part" and "a DS with one part out
//! of many" read the same way at call sites.

use crate::dataset::Dataset;
use smallvec::SmallVec;
use std::fmt;

/// A small-size-optimized vector of element value parts.
pub type C<T> = SmallVec<[T; 2]>;

/// A decoded DICOM element value.
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    /// Text parts, after de-padding and backslash splitting.
    Strs(C<String>),
    /// Unsigned 16-bit integers (US, AT).
    U16s(C<u16>),
    /// Signed 16-bit integers (SS).
    I16s(C<i16>),
    /// Unsigned 32-bit integers (UL).
    U32s(C<u32>),
    /// Signed 32-bit integers (SL).
    I32s(C<i32>),
    /// Single-precision floats (FL).
    F32s(C<f32>),
    /// Double-precision floats (FD).
    F64s(C<f64>),
    /// Raw value bytes (OB, OW, UN outside pixel data and CSA).
    Bytes(Vec<u8>),
    /// A nested data set from a sequence element.
    Nested(Box<Dataset>),
    /// Location of the pixel data payload within the source file.
    PixelLocator {
        /// byte offset of the value field
        offset: u64,
        /// value field length in bytes
        length: u32,
    },
    /// An undecoded Siemens CSA blob.
    Csa(Vec<u8>),
}

impl Value {
    /// Get the value as a single string slice, unwrapping a one-part list.
    /// Multi-part values yield their first part.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Strs(v) => v.first().map(|s| s.as_str()),
            _ => None,
        }
    }

    /// Get all text parts of the value.
    pub fn strs(&self) -> Option<&[String]> {
        match self {
            Value::Strs(v) => Some(v),
            _ => None,
        }
    }

    /// Interpret the (first part of the) value as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Strs(v) => v.first().and_then(|s| s.trim().parse().ok()),
            Value::U16s(v) => v.first().map(|&x| i64::from(x)),
            Value::I16s(v) => v.first().map(|&x| i64::from(x)),
            Value::U32s(v) => v.first().map(|&x| i64::from(x)),
            Value::I32s(v) => v.first().map(|&x| i64::from(x)),
            _ => None,
        }
    }

    /// Interpret the (first part of the) value as a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Strs(v) => v.first().and_then(|s| s.trim().parse().ok()),
            Value::U16s(v) => v.first().map(|&x| f64::from(x)),
            Value::I16s(v) => v.first().map(|&x| f64::from(x)),
            Value::U32s(v) => v.first().map(|&x| f64::from(x)),
            Value::I32s(v) => v.first().map(|&x| f64::from(x)),
            Value::F32s(v) => v.first().map(|&x| f64::from(x)),
            Value::F64s(v) => v.first().copied(),
            _ => None,
        }
    }

    /// Interpret every part of the value as a float.
    /// Fails if any part does not parse.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Value::Strs(v) => v
                .iter()
                .map(|s| s.trim().parse().ok())
                .collect::<Option<Vec<_>>>(),
            Value::U16s(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Value::I16s(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Value::U32s(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Value::I32s(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Value::F32s(v) => Some(v.iter().map(|&x| f64::from(x)).collect()),
            Value::F64s(v) => Some(v.to_vec()),
            _ => None,
        }
    }

    /// The nested data set of a sequence element, if this is one.
    pub fn nested(&self) -> Option<&Dataset> {
        match self {
            Value::Nested(inner) => Some(inner),
            _ => None,
        }
    }

    /// The raw bytes of an OB/OW/UN or CSA value.
    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) | Value::Csa(b) => Some(b),
            _ => None,
        }
    }

    /// Helper constructor for a single-part text value.
    pub fn from_string(s: impl Into<String>) -> Value {
        let mut v = C::new();
        v.push(s.into());
        Value::Strs(v)
    }

    /// Helper constructor for a multi-part text value.
    pub fn from_strings<I, S>(parts: I) -> Value
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Strs(parts.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Strs(v) => write!(f, "{}", v.join("\\")),
            Value::U16s(v) => write!(f, "{:?}", v),
            Value::I16s(v) => write!(f, "{:?}", v),
            Value::U32s(v) => write!(f, "{:?}", v),
            Value::I32s(v) => write!(f, "{:?}", v),
            Value::F32s(v) => write!(f, "{:?}", v),
            Value::F64s(v) => write!(f, "{:?}", v),
            Value::Bytes(b) => write!(f, "({} bytes)", b.len()),
            Value::Nested(_) => f.write_str("(sequence)"),
            Value::PixelLocator { offset, length } => {
                write!(f, "(pixel data @{} +{})", offset, length)
            }
            Value::Csa(b) => write!(f, "(CSA, {} bytes)", b.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_unwrapping() {
        let v = Value::from_string("2.5");
        assert_eq!(v.as_str(), Some("2.5"));
        assert_eq!(v.as_f64(), Some(2.5));

        let v = Value::from_strings(["0.9375", "0.9375"]);
        assert_eq!(v.as_f64(), Some(0.9375));
        assert_eq!(v.to_f64_vec(), Some(vec![0.9375, 0.9375]));
    }

    #[test]
    fn numeric_access() {
        let v = Value::U16s(smallvec::smallvec![256]);
        assert_eq!(v.as_int(), Some(256));
        assert_eq!(v.as_f64(), Some(256.0));
        assert_eq!(v.as_str(), None);
    }

    #[test]
    fn bad_parses_are_none() {
        let v = Value::from_string("not-a-number");
        assert_eq!(v.as_f64(), None);
        assert_eq!(v.as_int(), None);

        let v = Value::Bytes(vec![1, 2, 3]);
        assert_eq!(v.to_f64_vec(), None);
    }
}
