//! In-process EXIF reader used when the external tool is missing.
//! Read-only: writes always need the tool.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::Tag;

use super::{ExifToolError, TagMap};

/// Read the subset of tags the library cares about, keyed by exiftool names.
pub fn read_tags_native(path: &Path) -> Result<TagMap, ExifToolError> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ExifToolError::ReadOnly(path.to_path_buf()),
        _ => ExifToolError::Failed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;

    let mut reader = BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        // No EXIF block at all is an empty record, not a failure
        Err(exif::Error::NotFound(_)) => return Ok(TagMap::new()),
        Err(e) => {
            return Err(ExifToolError::Failed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    let mut tags = TagMap::new();
    let text_fields = [
        (exif::Tag::Make, "Make"),
        (exif::Tag::Model, "Model"),
        (exif::Tag::LensModel, "LensModel"),
        (exif::Tag::DateTimeOriginal, "DateTimeOriginal"),
        (exif::Tag::DateTimeDigitized, "CreateDate"),
        (exif::Tag::ImageDescription, "ImageDescription"),
    ];
    for (tag, name) in text_fields {
        if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
            let value = field.display_value().to_string();
            let value = value.trim_matches('"').trim();
            if !value.is_empty() {
                tags.insert(name.to_string(), value.to_string());
            }
        }
    }

    if let Some(field) = exif.get_field(exif::Tag::PhotographicSensitivity, exif::In::PRIMARY) {
        if let Some(iso) = field.value.get_uint(0) {
            tags.insert("ISO".to_string(), iso.to_string());
        }
    }

    for (tag, name) in [(exif::Tag::FNumber, "FNumber"), (exif::Tag::FocalLength, "FocalLength")] {
        if let Some(field) = exif.get_field(tag, exif::In::PRIMARY) {
            if let exif::Value::Rational(ref v) = field.value {
                if let Some(r) = v.first().filter(|r| r.denom != 0) {
                    tags.insert(name.to_string(), format_decimal(r.to_f64()));
                }
            }
        }
    }

    if let Some(field) = exif.get_field(exif::Tag::ExposureTime, exif::In::PRIMARY) {
        if let exif::Value::Rational(ref v) = field.value {
            if let Some(r) = v.first().filter(|r| r.denom != 0 && r.num != 0) {
                let shutter = if r.num < r.denom {
                    format!("1/{}", (r.denom as f64 / r.num as f64).round())
                } else {
                    format_decimal(r.to_f64())
                };
                tags.insert("ExposureTime".to_string(), shutter);
            }
        }
    }

    if let Some(lat) = read_coordinate(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, 'S') {
        tags.insert("GPSLatitude".to_string(), lat.to_string());
    }
    if let Some(lon) = read_coordinate(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, 'W') {
        tags.insert("GPSLongitude".to_string(), lon.to_string());
    }
    if let Some(field) = exif.get_field(exif::Tag::GPSAltitude, exif::In::PRIMARY) {
        if let exif::Value::Rational(ref v) = field.value {
            if let Some(r) = v.first().filter(|r| r.denom != 0) {
                let below = exif
                    .get_field(exif::Tag::GPSAltitudeRef, exif::In::PRIMARY)
                    .and_then(|f| f.value.get_uint(0))
                    == Some(1);
                let alt = if below { -r.to_f64() } else { r.to_f64() };
                tags.insert("GPSAltitude".to_string(), format_decimal(alt));
            }
        }
    }

    if let Some(field) = exif.get_field(exif::Tag::UserComment, exif::In::PRIMARY) {
        if let exif::Value::Undefined(ref bytes, _) = field.value {
            if let Some(comment) = decode_user_comment(bytes) {
                tags.insert("UserComment".to_string(), comment);
            }
        }
    }

    Ok(tags)
}

fn read_coordinate(
    exif: &exif::Exif,
    value_tag: exif::Tag,
    ref_tag: exif::Tag,
    negative_ref: char,
) -> Option<f64> {
    let field = exif.get_field(value_tag, exif::In::PRIMARY)?;
    let exif::Value::Rational(ref parts) = field.value else {
        return None;
    };
    if parts.len() < 3 || parts.iter().any(|r| r.denom == 0) {
        return None;
    }
    let decimal = parts[0].to_f64() + parts[1].to_f64() / 60.0 + parts[2].to_f64() / 3600.0;

    let negative = exif
        .get_field(ref_tag, exif::In::PRIMARY)
        .map(|f| f.display_value().to_string().contains(negative_ref))
        .unwrap_or(false);
    Some(if negative { -decimal } else { decimal })
}

/// UserComment starts with an 8-byte character code; ASCII and undefined
/// codes are read as UTF-8, anything else is skipped.
fn decode_user_comment(bytes: &[u8]) -> Option<String> {
    if bytes.len() <= 8 {
        return None;
    }
    let (code, text) = bytes.split_at(8);
    if code.starts_with(b"UNICODE") || code.starts_with(b"JIS") {
        return None;
    }
    let text = String::from_utf8_lossy(text);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}

fn format_decimal(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.fract() == 0.0 {
        format!("{}", rounded as i64)
    } else {
        rounded.to_string()
    }
}
