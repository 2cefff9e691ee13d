//! A wrapper type providing uniform access to binary data.
//!
//! See the [`ByteView`] struct for more documentation.
//!
//! [`ByteView`]: struct.ByteView.html

use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::cell::StableDeref;

/// The owner of the data behind a `ByteView`.
#[derive(Debug)]
enum ByteViewBacking<'a> {
    Buf(Cow<'a, [u8]>),
    Mmap(Mmap),
}

impl Deref for ByteViewBacking<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        match *self {
            ByteViewBacking::Buf(ref buf) => buf,
            ByteViewBacking::Mmap(ref mmap) => mmap,
        }
    }
}

/// A smart pointer for object file data.
///
/// A `ByteView` dereferences into a `&[u8]` and guarantees random access to
/// the underlying bytes, regardless of whether they come from a memory
/// mapping, an owned buffer or a borrowed slice. Cloning is cheap, since all
/// clones share the same backing storage.
///
/// This is the storage behind every session opened from a file path: the
/// session borrows all of its section data out of a `ByteView`, and the two
/// are kept together with a [`SelfCell`].
///
/// # Example
///
/// ```
/// use dwarven_common::ByteView;
///
/// let view = ByteView::from_slice(b"\x7fELF");
/// assert_eq!(&view[..2], b"\x7fE");
/// ```
///
/// [`SelfCell`]: struct.SelfCell.html
#[derive(Clone, Debug)]
pub struct ByteView<'a> {
    backing: Arc<ByteViewBacking<'a>>,
}

impl<'a> ByteView<'a> {
    fn with_backing(backing: ByteViewBacking<'a>) -> Self {
        ByteView {
            backing: Arc::new(backing),
        }
    }

    /// Constructs a `ByteView` from a `Cow`.
    pub fn from_cow(cow: Cow<'a, [u8]>) -> Self {
        ByteView::with_backing(ByteViewBacking::Buf(cow))
    }

    /// Constructs a `ByteView` from a borrowed byte slice.
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        ByteView::from_cow(Cow::Borrowed(bytes))
    }

    /// Constructs a `ByteView` from an owned vector of bytes.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        ByteView::from_cow(Cow::Owned(bytes))
    }

    /// Constructs a `ByteView` by memory-mapping an open file handle.
    pub fn map_file(file: File) -> Result<Self, io::Error> {
        let backing = match unsafe { Mmap::map(&file) } {
            Ok(mmap) => ByteViewBacking::Mmap(mmap),
            Err(err) => {
                // Zero-sized files cannot be mmapped. Treat them as an
                // empty buffer instead of failing the open.
                if err.kind() == io::ErrorKind::InvalidInput && file.metadata()?.len() == 0 {
                    ByteViewBacking::Buf(Cow::Borrowed(b""))
                } else {
                    return Err(err);
                }
            }
        };

        Ok(ByteView::with_backing(backing))
    }

    /// Constructs a `ByteView` by memory-mapping the file at the given path.
    pub fn open<P>(path: P) -> Result<Self, io::Error>
    where
        P: AsRef<Path>,
    {
        let file = File::open(path)?;
        Self::map_file(file)
    }

    /// Returns a slice of the underlying data.
    pub fn as_slice(&self) -> &[u8] {
        self.backing.deref()
    }
}

impl AsRef<[u8]> for ByteView<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl Deref for ByteView<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

// The backing storage sits behind an `Arc` and is never mutated, so the
// deref target is stable across moves of the `ByteView` itself.
unsafe impl StableDeref for ByteView<'_> {}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_open_empty_file() -> Result<(), std::io::Error> {
        let mut temp = tempfile::NamedTempFile::new()?;
        temp.flush()?;

        let view = ByteView::open(temp.path())?;
        assert_eq!(view.as_slice(), b"");
        Ok(())
    }

    #[test]
    fn test_open_file() -> Result<(), std::io::Error> {
        let mut temp = tempfile::NamedTempFile::new()?;
        temp.write_all(b"hello world")?;
        temp.flush()?;

        let view = ByteView::open(temp.path())?;
        assert_eq!(view.as_slice(), b"hello world");
        Ok(())
    }

    #[test]
    fn test_clone_shares_backing() {
        let view = ByteView::from_vec(b"shared".to_vec());
        let clone = view.clone();
        assert_eq!(view.as_slice().as_ptr(), clone.as_slice().as_ptr());
    }
}
