//! Dwarven reads DWARF debugging information.
//!
//! Given an object file (ELF, Mach-O or PE) or a plain byte buffer, this
//! library exposes the debugging contents: compilation units, debugging
//! information entries with their attributes, source line programs, call
//! frame information, location and range lists, and split-DWARF companions.
//! It is built for consumers such as debuggers, symbolizers and coverage
//! tools, and can be used as a whole or in parts.

#![warn(missing_docs)]

#[doc(inline)]
pub use dwarven_common as common;
#[doc(inline)]
#[cfg(feature = "debuginfo")]
pub use dwarven_debuginfo as debuginfo;
