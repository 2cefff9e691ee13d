//! Reading DWARF debugging information out of object files.
//!
//! This crate is the reader pipeline of the `dwarven` workspace. Given an
//! ELF, Mach-O or PE object -- or raw bytes through a custom
//! [`ObjectReader`] -- it exposes compilation units, debugging information
//! entries with their attributes, source line programs, call frame
//! information, range and location lists, and split-DWARF companions.
//!
//! # Structure
//!
//! Opening an object builds a [`SectionRegistry`]: the container front end
//! discovers the DWARF sections, filters them by section group, inflates
//! compressed data and applies relocations of unlinked objects. A
//! [`DwarfSession`] then borrows the registry and delivers the actual
//! debugging contents; unit headers are parsed eagerly, everything else
//! lazily on query. [`LoadedSession`] bundles both with the file handling
//! for the common path-based case, including debug-link and dSYM
//! resolution.
//!
//! Errors are values: malformed input surfaces as a [`DwarfError`] at the
//! DIE or unit that is damaged, valid absence as `Ok(None)`, and cosmetic
//! anomalies land in a bounded ring queried through
//! [`DwarfSession::harmless_errors`].
//!
//! # Example
//!
//! ```no_run
//! use dwarven_debuginfo::session::LoadedSession;
//!
//! # fn main() -> Result<(), dwarven_debuginfo::error::DwarfError> {
//! let loaded = LoadedSession::open("/usr/lib/debug/my_binary.debug")?;
//! let session = loaded.session();
//!
//! for unit in session.units() {
//!     let unit = unit?;
//!     if let Some(root) = unit.root()? {
//!         println!("{} at {:#x}", root.tag(), root.offset());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! [`ObjectReader`]: object/trait.ObjectReader.html
//! [`SectionRegistry`]: registry/struct.SectionRegistry.html
//! [`DwarfSession`]: session/struct.DwarfSession.html
//! [`LoadedSession`]: session/struct.LoadedSession.html
//! [`DwarfError`]: error/struct.DwarfError.html
//! [`DwarfSession::harmless_errors`]: session/struct.DwarfSession.html#method.harmless_errors

#![warn(missing_docs)]

mod base;

pub mod abbrev;
pub mod aranges;
pub mod constants;
pub mod elf;
pub mod error;
pub mod forms;
pub mod frame;
pub mod line;
pub mod lists;
pub mod macho;
pub mod object;
pub mod pe;
pub mod reader;
pub mod registry;
pub mod session;
pub mod unit;

pub use crate::base::*;
pub use crate::error::{DwarfError, DwarfErrorKind};
pub use crate::object::{Object, ObjectReader};
pub use crate::registry::{PathSource, SectionRegistry};
pub use crate::session::{DwarfSession, LoadedSession, SessionLoader};
