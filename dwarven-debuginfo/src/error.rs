//! First-class error values for the DWARF reader.
//!
//! Every operation in this crate returns errors by value. Valid absence (a
//! missing section, a PC with no frame row) is `Ok(None)` rather than an
//! error. Parsers recover only at DIE or unit boundaries: a malformed
//! attribute aborts the decode of its whole DIE.
//!
//! Non-fatal anomalies that are not worth failing a call over (unexpected
//! padding, cosmetically out-of-range fields) are recorded in a bounded
//! [`HarmlessRing`] owned by the session.
//!
//! [`HarmlessRing`]: struct.HarmlessRing.html

use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt;

use thiserror::Error;

use crate::constants::DwForm;

/// The error kind for [`DwarfError`].
///
/// [`DwarfError`]: struct.DwarfError.html
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DwarfErrorKind {
    /// A read went past the end of its section or declared limit.
    Truncated,

    /// A LEB128 value was overlong or overflowed 64 bits.
    MalformedLeb,

    /// An initial length used one of the reserved DWARF 3 escape values.
    ReservedInitialLength(u32),

    /// The buffer does not start with a known object container magic.
    BadMagic,

    /// The object container header itself is too short or unreadable.
    TruncatedHeader,

    /// A section header declares a size or offset beyond the file.
    SectionSizeOrOffsetLarge,

    /// A section name offset points outside the section string table.
    SectionStringOffsetBad,

    /// A fixed-size record has an impossible size for its type.
    BadTypeSize,

    /// A `SHT_GROUP` payload is malformed or assigns a section twice.
    MalformedSectionGroup,

    /// A section is compressed with an algorithm this reader cannot
    /// inflate.
    UnsupportedCompression(u32),

    /// The object's pointer width is neither 32 nor 64 bits.
    OffsetSize,

    /// An abbreviation code did not resolve in the unit's table.
    AbbrevMissing(u64),

    /// An attribute used a form this reader does not know.
    UnknownForm(DwForm),

    /// An instruction stream contained an opcode this reader does not know.
    UnknownOpcode(u8),

    /// The DWARF version of a header is not supported.
    VersionUnsupported(u16),

    /// A relocation type on a DWARF section could not be applied.
    UnhandledRelocation(u32),

    /// An indexed form was used but the unit carries no base offset for it.
    MissingBase,

    /// An address index is out of range of `.debug_addr`.
    AddrIndexOutOfRange(u64),

    /// A handle was used against a session or unit it does not belong to.
    InvalidHandle,

    /// An I/O error from the underlying reader.
    Io,
}

impl fmt::Display for DwarfErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "read past the end of a section"),
            Self::MalformedLeb => write!(f, "malformed LEB128 value"),
            Self::ReservedInitialLength(value) => {
                write!(f, "reserved initial length value {:#x}", value)
            }
            Self::BadMagic => write!(f, "unrecognized object file magic"),
            Self::TruncatedHeader => write!(f, "object header truncated"),
            Self::SectionSizeOrOffsetLarge => {
                write!(f, "section size or offset exceeds the file size")
            }
            Self::SectionStringOffsetBad => {
                write!(f, "section name offset outside the string table")
            }
            Self::BadTypeSize => write!(f, "record size impossible for its type"),
            Self::MalformedSectionGroup => write!(f, "malformed section group"),
            Self::UnsupportedCompression(ch_type) => {
                write!(f, "unsupported section compression type {}", ch_type)
            }
            Self::OffsetSize => write!(f, "pointer width is neither 32 nor 64 bits"),
            Self::AbbrevMissing(code) => {
                write!(f, "abbreviation code {} not found in table", code)
            }
            Self::UnknownForm(form) => write!(f, "unknown attribute form {}", form),
            Self::UnknownOpcode(op) => write!(f, "unknown opcode {:#x}", op),
            Self::VersionUnsupported(version) => {
                write!(f, "DWARF version {} not supported", version)
            }
            Self::UnhandledRelocation(rtype) => {
                write!(f, "unhandled relocation type {}", rtype)
            }
            Self::MissingBase => write!(f, "indexed form without a base offset"),
            Self::AddrIndexOutOfRange(index) => {
                write!(f, "address index {} out of range of .debug_addr", index)
            }
            Self::InvalidHandle => write!(f, "handle does not belong to this session"),
            Self::Io => write!(f, "I/O error while reading the object"),
        }
    }
}

/// An error encountered while reading DWARF debugging information.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct DwarfError {
    kind: DwarfErrorKind,
    #[source]
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl DwarfError {
    /// Creates a new DWARF error from a known kind of error as well as an
    /// arbitrary error payload.
    pub(crate) fn new<E>(kind: DwarfErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let source = Some(source.into());
        Self { kind, source }
    }

    /// Returns the corresponding [`DwarfErrorKind`] for this error.
    pub fn kind(&self) -> DwarfErrorKind {
        self.kind
    }
}

impl From<DwarfErrorKind> for DwarfError {
    fn from(kind: DwarfErrorKind) -> Self {
        Self { kind, source: None }
    }
}

impl From<std::io::Error> for DwarfError {
    fn from(e: std::io::Error) -> Self {
        Self::new(DwarfErrorKind::Io, e)
    }
}

/// A bounded ring of non-fatal anomalies observed while parsing.
///
/// The ring records at most `capacity` entries; once full, the oldest entry
/// is dropped for each new one. Recording never fails and never surfaces
/// through call returns.
#[derive(Debug)]
pub struct HarmlessRing {
    entries: RefCell<VecDeque<DwarfError>>,
    capacity: usize,
}

impl HarmlessRing {
    /// The default number of retained entries.
    pub const DEFAULT_CAPACITY: usize = 50;

    /// Creates a ring retaining up to `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        HarmlessRing {
            entries: RefCell::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Records an anomaly, evicting the oldest entry when full.
    pub fn record(&self, error: DwarfError) {
        let mut entries = self.entries.borrow_mut();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(error);
    }

    /// Removes and returns all recorded anomalies, oldest first.
    pub fn drain(&self) -> Vec<DwarfError> {
        self.entries.borrow_mut().drain(..).collect()
    }

    /// Returns the number of currently retained anomalies.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns `true` if no anomalies have been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for HarmlessRing {
    fn default() -> Self {
        HarmlessRing::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let ring = HarmlessRing::with_capacity(2);
        ring.record(DwarfErrorKind::Truncated.into());
        ring.record(DwarfErrorKind::MalformedLeb.into());
        ring.record(DwarfErrorKind::MissingBase.into());

        let drained = ring.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind(), DwarfErrorKind::MalformedLeb);
        assert_eq!(drained[1].kind(), DwarfErrorKind::MissingBase);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_error_display() {
        let error = DwarfError::from(DwarfErrorKind::AbbrevMissing(17));
        assert_eq!(error.to_string(), "abbreviation code 17 not found in table");
    }
}
