//! Common types and byte-access primitives for the dwarven DWARF reader.
//!
//! This crate is shared between the reader crates of the `dwarven`
//! workspace. It provides:
//!
//! - [`ByteView`], a smart pointer over memory-mapped files, owned buffers
//!   or borrowed slices, used as the backing storage of parsed objects.
//! - [`SelfCell`] and [`AsSelf`], primitives to carry an owned buffer and a
//!   parser state borrowing from it in a single movable value.
//! - Basic types shared across object formats, such as [`Endianness`] and
//!   [`Arch`].
//!
//! [`ByteView`]: struct.ByteView.html
//! [`SelfCell`]: struct.SelfCell.html
//! [`AsSelf`]: trait.AsSelf.html
//! [`Endianness`]: enum.Endianness.html
//! [`Arch`]: enum.Arch.html

#![warn(missing_docs)]

mod byteview;
mod cell;
mod types;

pub use crate::byteview::*;
pub use crate::cell::*;
pub use crate::types::*;
