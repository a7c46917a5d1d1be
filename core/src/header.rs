//! Attribute tags and value representations.

use std::fmt;
use std::str::{from_utf8, FromStr};

/// A DICOM attribute tag, a pair of 16-bit unsigned integers
/// `(group, element)`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct Tag(pub u16, pub u16);

impl Tag {
    /// Getter for the tag's group number.
    #[inline]
    pub fn group(self) -> u16 {
        self.0
    }

    /// Getter for the tag's element number.
    #[inline]
    pub fn element(self) -> u16 {
        self.1
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

impl From<(u16, u16)> for Tag {
    #[inline]
    fn from((g, e): (u16, u16)) -> Tag {
        Tag(g, e)
    }
}

/// An enum type for a DICOM value representation.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum VR {
    /// Application Entity
    AE,
    /// Age String
    AS,
    /// Attribute Tag
    AT,
    /// Code String
    CS,
    /// Date
    DA,
    /// Decimal String
    DS,
    /// Date Time
    DT,
    /// Floating Point Single
    FL,
    /// Floating Point Double
    FD,
    /// Integer String
    IS,
    /// Long String
    LO,
    /// Long Text
    LT,
    /// Other Byte
    OB,
    /// Other Word
    OW,
    /// Person Name
    PN,
    /// Short String
    SH,
    /// Signed Long
    SL,
    /// Sequence of Items
    SQ,
    /// Signed Short
    SS,
    /// Short Text
    ST,
    /// Time
    TM,
    /// Unique Identifier
    UI,
    /// Unsigned Long
    UL,
    /// Unknown
    UN,
    /// Unsigned Short
    US,
    /// Unlimited Text
    UT,
}

impl VR {
    /// Obtain the value representation corresponding to the given two bytes.
    /// Each byte should represent an alphabetic character in upper case.
    pub fn from_binary(chars: [u8; 2]) -> Option<Self> {
        from_utf8(&chars).ok().and_then(|s| VR::from_str(s).ok())
    }

    /// Retrieve a string representation of this VR.
    pub fn to_string(self) -> &'static str {
        use VR::*;
        match self {
            AE => "AE",
            AS => "AS",
            AT => "AT",
            CS => "CS",
            DA => "DA",
            DS => "DS",
            DT => "DT",
            FL => "FL",
            FD => "FD",
            IS => "IS",
            LO => "LO",
            LT => "LT",
            OB => "OB",
            OW => "OW",
            PN => "PN",
            SH => "SH",
            SL => "SL",
            SQ => "SQ",
            SS => "SS",
            ST => "ST",
            TM => "TM",
            UI => "UI",
            UL => "UL",
            UN => "UN",
            US => "US",
            UT => "UT",
        }
    }

    /// Whether an explicit-VR element with this representation carries a
    /// 2-byte reserved field followed by a 32-bit length, rather than a
    /// 16-bit length.
    pub fn has_long_length(self) -> bool {
        matches!(self, VR::OB | VR::OW | VR::SQ | VR::UN)
    }

    /// Whether the value field is decoded through the text path
    /// (space/NUL de-padding, backslash multiplicity).
    pub fn is_text(self) -> bool {
        use VR::*;
        matches!(
            self,
            AE | AS | CS | DA | DS | DT | IS | LO | LT | PN | SH | ST | TM | UI | UT
        )
    }
}

impl fmt::Display for VR {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(VR::to_string(*self))
    }
}

impl FromStr for VR {
    type Err = ();

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        use VR::*;
        match string {
            "AE" => Ok(AE),
            "AS" => Ok(AS),
            "AT" => Ok(AT),
            "CS" => Ok(CS),
            "DA" => Ok(DA),
            "DS" => Ok(DS),
            "DT" => Ok(DT),
            "FL" => Ok(FL),
            "FD" => Ok(FD),
            "IS" => Ok(IS),
            "LO" => Ok(LO),
            "LT" => Ok(LT),
            "OB" => Ok(OB),
            "OW" => Ok(OW),
            "PN" => Ok(PN),
            "SH" => Ok(SH),
            "SL" => Ok(SL),
            "SQ" => Ok(SQ),
            "SS" => Ok(SS),
            "ST" => Ok(ST),
            "TM" => Ok(TM),
            "UI" => Ok(UI),
            "UL" => Ok(UL),
            "UN" => Ok(UN),
            "US" => Ok(US),
            "UT" => Ok(UT),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_display() {
        assert_eq!(Tag(0x0020, 0x0037).to_string(), "(0020,0037)");
        assert_eq!(Tag(0x7FE0, 0x0010).to_string(), "(7FE0,0010)");
    }

    #[test]
    fn tag_ordering() {
        assert!(Tag(0x0008, 0x0008) < Tag(0x0008, 0x0020));
        assert!(Tag(0x0008, 0x0020) < Tag(0x0020, 0x000D));
    }

    #[test]
    fn vr_from_binary() {
        assert_eq!(VR::from_binary([b'C', b'S']), Some(VR::CS));
        assert_eq!(VR::from_binary([b'S', b'Q']), Some(VR::SQ));
        assert_eq!(VR::from_binary([b'z', b'z']), None);
    }

    #[test]
    fn vr_length_rule() {
        assert!(VR::OB.has_long_length());
        assert!(VR::UN.has_long_length());
        assert!(!VR::US.has_long_length());
        assert!(!VR::DS.has_long_length());
    }
}
