//! Tag constants for the attributes the converter addresses directly.

use voxconv_core::Tag;

/// File Meta Information Group Length
pub const FILE_META_GROUP_LENGTH: Tag = Tag(0x0002, 0x0000);
/// Transfer Syntax UID
pub const TRANSFER_SYNTAX_UID: Tag = Tag(0x0002, 0x0010);

/// Image Type
pub const IMAGE_TYPE: Tag = Tag(0x0008, 0x0008);
/// Study Date
pub const STUDY_DATE: Tag = Tag(0x0008, 0x0020);
/// Series Date
pub const SERIES_DATE: Tag = Tag(0x0008, 0x0021);
/// Acquisition Date
pub const ACQUISITION_DATE: Tag = Tag(0x0008, 0x0022);
/// Study Time
pub const STUDY_TIME: Tag = Tag(0x0008, 0x0030);
/// Series Time
pub const SERIES_TIME: Tag = Tag(0x0008, 0x0031);
/// Acquisition Time
pub const ACQUISITION_TIME: Tag = Tag(0x0008, 0x0032);
/// Study Description
pub const STUDY_DESCRIPTION: Tag = Tag(0x0008, 0x1030);
/// Series Description
pub const SERIES_DESCRIPTION: Tag = Tag(0x0008, 0x103E);

/// Patient Name
pub const PATIENT_NAME: Tag = Tag(0x0010, 0x0010);
/// Patient Comments
pub const PATIENT_COMMENTS: Tag = Tag(0x0010, 0x4000);

/// Scanning Sequence
pub const SCANNING_SEQUENCE: Tag = Tag(0x0018, 0x0020);
/// Scan Options
pub const SCAN_OPTIONS: Tag = Tag(0x0018, 0x0022);
/// MR Acquisition Type
pub const MR_ACQUISITION_TYPE: Tag = Tag(0x0018, 0x0023);
/// Slice Thickness
pub const SLICE_THICKNESS: Tag = Tag(0x0018, 0x0050);
/// Repetition Time
pub const REPETITION_TIME: Tag = Tag(0x0018, 0x0080);
/// Echo Time
pub const ECHO_TIME: Tag = Tag(0x0018, 0x0081);
/// Echo Numbers
pub const ECHO_NUMBERS: Tag = Tag(0x0018, 0x0086);
/// Magnetic Field Strength
pub const MAGNETIC_FIELD_STRENGTH: Tag = Tag(0x0018, 0x0087);
/// Spacing Between Slices
pub const SPACING_BETWEEN_SLICES: Tag = Tag(0x0018, 0x0088);
/// In-plane Phase Encoding Direction
pub const PHASE_ENCODING_DIRECTION: Tag = Tag(0x0018, 0x1312);
/// Flip Angle
pub const FLIP_ANGLE: Tag = Tag(0x0018, 0x1314);
/// Variable Flip Angle Flag
pub const VARIABLE_FLIP_ANGLE_FLAG: Tag = Tag(0x0018, 0x1315);
/// SAR (whole body predicted)
pub const SAR_BODY: Tag = Tag(0x0018, 0x1316);

/// Siemens B Value
pub const SIEMENS_B_VALUE: Tag = Tag(0x0019, 0x100C);
/// Siemens Diffusion Gradient Direction
pub const SIEMENS_DIFFUSION_DIRECTION: Tag = Tag(0x0019, 0x100E);
/// Siemens Table Position
pub const SIEMENS_TABLE_POSITION: Tag = Tag(0x0019, 0x1014);

/// Study Instance UID
pub const STUDY_INSTANCE_UID: Tag = Tag(0x0020, 0x000D);
/// Series Number
pub const SERIES_NUMBER: Tag = Tag(0x0020, 0x0011);
/// Instance Number
pub const INSTANCE_NUMBER: Tag = Tag(0x0020, 0x0013);
/// Image Position (Patient)
pub const IMAGE_POSITION_PATIENT: Tag = Tag(0x0020, 0x0032);
/// Image Orientation (Patient)
pub const IMAGE_ORIENTATION_PATIENT: Tag = Tag(0x0020, 0x0037);
/// Temporal Position Identifier
pub const TEMPORAL_POSITION_IDENTIFIER: Tag = Tag(0x0020, 0x0100);
/// Slice Location
pub const SLICE_LOCATION: Tag = Tag(0x0020, 0x1041);
/// Image Comments
pub const IMAGE_COMMENTS: Tag = Tag(0x0020, 0x4000);

/// Rows
pub const ROWS: Tag = Tag(0x0028, 0x0010);
/// Columns
pub const COLUMNS: Tag = Tag(0x0028, 0x0011);
/// Pixel Spacing
pub const PIXEL_SPACING: Tag = Tag(0x0028, 0x0030);
/// Bits Allocated
pub const BITS_ALLOCATED: Tag = Tag(0x0028, 0x0100);
/// Pixel Representation
pub const PIXEL_REPRESENTATION: Tag = Tag(0x0028, 0x0103);
/// Rescale Intercept
pub const RESCALE_INTERCEPT: Tag = Tag(0x0028, 0x1052);
/// Rescale Slope
pub const RESCALE_SLOPE: Tag = Tag(0x0028, 0x1053);

/// CSA Image Header Info
pub const CSA_IMAGE_HEADER: Tag = Tag(0x0029, 0x1010);
/// CSA Series Header Info
pub const CSA_SERIES_HEADER: Tag = Tag(0x0029, 0x1020);

/// Pixel Data
pub const PIXEL_DATA: Tag = Tag(0x7FE0, 0x0010);
