//! Attachment admission rules
//!
//! Pure rule-checking for candidate files before any transfer is attempted.
//! No I/O happens here; callers gather extension, mime type and size first.

use std::fmt;

/// What a candidate file looks like before upload
#[derive(Debug, Clone, Copy)]
pub struct FileCandidate<'a> {
    /// Filename extension, with or without the leading dot
    pub extension: &'a str,
    /// Declared mime type; `None` when the platform could not determine one
    pub mime: Option<&'a str>,
    pub size_bytes: u64,
}

/// Category assigned to an accepted file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Document,
}

/// Why a candidate was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Extension is on the executable/archive-risk denylist
    ForbiddenType,
    /// Mime or extension outside the allowed sets
    FormatUnsupported,
    /// No mime type available; filenames alone are not trusted
    TypeUnknown,
    FileTooLarge,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ForbiddenType => write!(f, "this file type is not allowed"),
            RejectReason::FormatUnsupported => write!(f, "unsupported file format"),
            RejectReason::TypeUnknown => write!(f, "could not determine the file type"),
            RejectReason::FileTooLarge => write!(f, "file is too large"),
        }
    }
}

pub const IMAGE_MIMES: &[&str] = &["image/jpeg", "image/png", "image/heic", "image/heif"];

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif"];

pub const DOCUMENT_MIMES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "text/plain",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/zip",
];

pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "doc", "docx", "txt", "xls", "xlsx", "zip"];

/// Checked before anything else, regardless of the declared mime
pub const FORBIDDEN_EXTENSIONS: &[&str] = &["rar", "exe", "apk", "dmg", "bat", "sh"];

const MIB: u64 = 1024 * 1024;

pub const IMAGE_MAX_BYTES: u64 = 10 * MIB;
pub const DOCUMENT_MAX_BYTES: u64 = 20 * MIB;
pub const ZIP_MAX_BYTES: u64 = 50 * MIB;

/// Decide whether a candidate file may be uploaded.
///
/// Deterministic and side-effect-free. The denylist wins over everything,
/// then a missing mime type is rejected outright, then mime and extension
/// must both land in the same allowed family before size caps apply.
pub fn validate(candidate: &FileCandidate<'_>) -> Result<AttachmentKind, RejectReason> {
    let ext = normalize_extension(candidate.extension);

    if FORBIDDEN_EXTENSIONS.contains(&ext.as_str()) {
        return Err(RejectReason::ForbiddenType);
    }

    let mime = match candidate.mime.map(str::trim) {
        Some(m) if !m.is_empty() => m.to_ascii_lowercase(),
        _ => return Err(RejectReason::TypeUnknown),
    };

    if IMAGE_MIMES.contains(&mime.as_str()) {
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(RejectReason::FormatUnsupported);
        }
        if candidate.size_bytes > IMAGE_MAX_BYTES {
            return Err(RejectReason::FileTooLarge);
        }
        Ok(AttachmentKind::Image)
    } else if DOCUMENT_MIMES.contains(&mime.as_str()) {
        if !DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            return Err(RejectReason::FormatUnsupported);
        }
        let cap = if ext == "zip" {
            ZIP_MAX_BYTES
        } else {
            DOCUMENT_MAX_BYTES
        };
        if candidate.size_bytes > cap {
            return Err(RejectReason::FileTooLarge);
        }
        Ok(AttachmentKind::Document)
    } else {
        Err(RejectReason::FormatUnsupported)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}
