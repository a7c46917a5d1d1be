//! The embedded attribute table.
//!
//! This is the subset of the standard data dictionary that the converter
//! consults, plus the Siemens private attributes it knows how to read.
//! Attribute names are spelled as in the standard; the registry derives the
//! lowercase short names at initialization time.

use voxconv_core::dictionary::DictionaryEntry;
use voxconv_core::{Tag, VR};

macro_rules! entry {
    ($g:literal, $e:literal, $vr:ident, $vm:literal, $name:literal) => {
        DictionaryEntry {
            tag: Tag($g, $e),
            vr: VR::$vr,
            vm: $vm,
            name: $name,
        }
    };
}

/// All known attribute entries.
pub static ENTRIES: &[DictionaryEntry] = &[
    // file meta group
    entry!(0x0002, 0x0000, UL, "1", "File Meta Information Group Length"),
    entry!(0x0002, 0x0001, OB, "1", "File Meta Information Version"),
    entry!(0x0002, 0x0002, UI, "1", "Media Storage SOP Class UID"),
    entry!(0x0002, 0x0003, UI, "1", "Media Storage SOP Instance UID"),
    entry!(0x0002, 0x0010, UI, "1", "Transfer Syntax UID"),
    entry!(0x0002, 0x0012, UI, "1", "Implementation Class UID"),
    entry!(0x0002, 0x0013, SH, "1", "Implementation Version Name"),
    // identification
    entry!(0x0008, 0x0008, CS, "1-n", "Image Type"),
    entry!(0x0008, 0x0016, UI, "1", "SOP Class UID"),
    entry!(0x0008, 0x0018, UI, "1", "SOP Instance UID"),
    entry!(0x0008, 0x0020, DA, "1", "Study Date"),
    entry!(0x0008, 0x0021, DA, "1", "Series Date"),
    entry!(0x0008, 0x0022, DA, "1", "Acquisition Date"),
    entry!(0x0008, 0x0023, DA, "1", "Content Date"),
    entry!(0x0008, 0x0030, TM, "1", "Study Time"),
    entry!(0x0008, 0x0031, TM, "1", "Series Time"),
    entry!(0x0008, 0x0032, TM, "1", "Acquisition Time"),
    entry!(0x0008, 0x0033, TM, "1", "Content Time"),
    entry!(0x0008, 0x0050, SH, "1", "Accession Number"),
    entry!(0x0008, 0x0060, CS, "1", "Modality"),
    entry!(0x0008, 0x0070, LO, "1", "Manufacturer"),
    entry!(0x0008, 0x0080, LO, "1", "Institution Name"),
    entry!(0x0008, 0x1030, LO, "1", "Study Description"),
    entry!(0x0008, 0x103E, LO, "1", "Series Description"),
    entry!(0x0008, 0x1090, LO, "1", "Manufacturer Model Name"),
    // patient
    entry!(0x0010, 0x0010, PN, "1", "Patient Name"),
    entry!(0x0010, 0x0020, LO, "1", "Patient ID"),
    entry!(0x0010, 0x0030, DA, "1", "Patient Birth Date"),
    entry!(0x0010, 0x0040, CS, "1", "Patient Sex"),
    entry!(0x0010, 0x1030, DS, "1", "Patient Weight"),
    entry!(0x0010, 0x4000, LT, "1", "Patient Comments"),
    // acquisition
    entry!(0x0018, 0x0020, CS, "1-n", "Scanning Sequence"),
    entry!(0x0018, 0x0021, CS, "1-n", "Sequence Variant"),
    entry!(0x0018, 0x0022, CS, "1-n", "Scan Options"),
    entry!(0x0018, 0x0023, CS, "1", "MR Acquisition Type"),
    entry!(0x0018, 0x0024, SH, "1", "Sequence Name"),
    entry!(0x0018, 0x0050, DS, "1", "Slice Thickness"),
    entry!(0x0018, 0x0080, DS, "1", "Repetition Time"),
    entry!(0x0018, 0x0081, DS, "1", "Echo Time"),
    entry!(0x0018, 0x0082, DS, "1", "Inversion Time"),
    entry!(0x0018, 0x0083, DS, "1", "Number of Averages"),
    entry!(0x0018, 0x0086, IS, "1-n", "Echo Numbers"),
    entry!(0x0018, 0x0087, DS, "1", "Magnetic Field Strength"),
    entry!(0x0018, 0x0088, DS, "1", "Spacing Between Slices"),
    entry!(0x0018, 0x0091, IS, "1", "Echo Train Length"),
    entry!(0x0018, 0x1030, LO, "1", "Protocol Name"),
    entry!(0x0018, 0x1312, CS, "1", "In-plane Phase Encoding Direction"),
    entry!(0x0018, 0x1314, DS, "1", "Flip Angle"),
    entry!(0x0018, 0x1315, CS, "1", "Variable Flip Angle Flag"),
    entry!(0x0018, 0x1316, DS, "1", "SAR"),
    entry!(0x0018, 0x5100, CS, "1", "Patient Position"),
    // Siemens private (group 0019, as typed by explicit-VR exports)
    entry!(0x0019, 0x100C, IS, "1", "Siemens B Value"),
    entry!(0x0019, 0x100E, DS, "3", "Siemens Diffusion Gradient Direction"),
    entry!(0x0019, 0x1014, IS, "3", "Siemens Table Position"),
    // relationship
    entry!(0x0020, 0x000D, UI, "1", "Study Instance UID"),
    entry!(0x0020, 0x000E, UI, "1", "Series Instance UID"),
    entry!(0x0020, 0x0010, SH, "1", "Study ID"),
    entry!(0x0020, 0x0011, IS, "1", "Series Number"),
    entry!(0x0020, 0x0012, IS, "1", "Acquisition Number"),
    entry!(0x0020, 0x0013, IS, "1", "Instance Number"),
    entry!(0x0020, 0x0032, DS, "3", "Image Position (Patient)"),
    entry!(0x0020, 0x0037, DS, "6", "Image Orientation (Patient)"),
    entry!(0x0020, 0x0052, UI, "1", "Frame of Reference UID"),
    entry!(0x0020, 0x0100, IS, "1", "Temporal Position Identifier"),
    entry!(0x0020, 0x0105, IS, "1", "Number of Temporal Positions"),
    entry!(0x0020, 0x1041, DS, "1", "Slice Location"),
    entry!(0x0020, 0x4000, LT, "1", "Image Comments"),
    // image
    entry!(0x0028, 0x0002, US, "1", "Samples per Pixel"),
    entry!(0x0028, 0x0004, CS, "1", "Photometric Interpretation"),
    entry!(0x0028, 0x0010, US, "1", "Rows"),
    entry!(0x0028, 0x0011, US, "1", "Columns"),
    entry!(0x0028, 0x0030, DS, "2", "Pixel Spacing"),
    entry!(0x0028, 0x0100, US, "1", "Bits Allocated"),
    entry!(0x0028, 0x0101, US, "1", "Bits Stored"),
    entry!(0x0028, 0x0102, US, "1", "High Bit"),
    entry!(0x0028, 0x0103, US, "1", "Pixel Representation"),
    entry!(0x0028, 0x1052, DS, "1", "Rescale Intercept"),
    entry!(0x0028, 0x1053, DS, "1", "Rescale Slope"),
    entry!(0x0028, 0x1054, LO, "1", "Rescale Type"),
    // Siemens CSA containers
    entry!(0x0029, 0x1010, OB, "1", "CSA Image Header Info"),
    entry!(0x0029, 0x1020, OB, "1", "CSA Series Header Info"),
    // pixel data
    entry!(0x7FE0, 0x0010, OW, "1", "Pixel Data"),
];
