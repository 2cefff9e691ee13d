//! Basic types shared across the object formats understood by the reader.

use std::fmt;
use std::str::FromStr;

/// The byte order of an object file.
///
/// The byte order is determined once when an object is opened and then
/// threaded through every fixed-width read performed on its sections.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endianness {
    /// The native byte order of the machine running this code.
    #[cfg(target_endian = "little")]
    pub const NATIVE: Endianness = Endianness::Little;

    /// The native byte order of the machine running this code.
    #[cfg(target_endian = "big")]
    pub const NATIVE: Endianness = Endianness::Big;

    /// Returns `true` if this is little-endian byte order.
    pub fn is_little(self) -> bool {
        self == Endianness::Little
    }
}

impl Default for Endianness {
    fn default() -> Self {
        Endianness::NATIVE
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => f.write_str("little"),
            Endianness::Big => f.write_str("big"),
        }
    }
}

/// An error returned when parsing an unknown [`Arch`](enum.Arch.html) name.
#[derive(Debug)]
pub struct UnknownArchError;

impl fmt::Display for UnknownArchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown architecture")
    }
}

impl std::error::Error for UnknownArchError {}

/// The CPU architecture an object file was compiled for.
///
/// The reader itself is architecture independent; the variants listed here
/// are the ones that influence parsing, most notably the relocation record
/// layouts of MIPS64 and SPARCv9 objects.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum Arch {
    /// An architecture the reader does not need to distinguish.
    Unknown,
    /// x86 (32-bit).
    X86,
    /// x86-64.
    Amd64,
    /// 32-bit ARM.
    Arm,
    /// AArch64.
    Arm64,
    /// 32-bit PowerPC.
    Ppc,
    /// 64-bit PowerPC.
    Ppc64,
    /// 32-bit MIPS.
    Mips,
    /// 64-bit MIPS.
    Mips64,
    /// SPARC V9.
    Sparc64,
    /// RISC-V (64-bit).
    Riscv64,
}

impl Arch {
    /// Returns the name of this architecture.
    pub fn name(self) -> &'static str {
        match self {
            Arch::Unknown => "unknown",
            Arch::X86 => "x86",
            Arch::Amd64 => "x86_64",
            Arch::Arm => "arm",
            Arch::Arm64 => "arm64",
            Arch::Ppc => "ppc",
            Arch::Ppc64 => "ppc64",
            Arch::Mips => "mips",
            Arch::Mips64 => "mips64",
            Arch::Sparc64 => "sparc64",
            Arch::Riscv64 => "riscv64",
        }
    }

    /// Returns the natural pointer width of this architecture in bytes, if
    /// the architecture alone determines it.
    pub fn pointer_size(self) -> Option<usize> {
        match self {
            Arch::Unknown => None,
            Arch::X86 | Arch::Arm | Arch::Ppc | Arch::Mips => Some(4),
            Arch::Amd64
            | Arch::Arm64
            | Arch::Ppc64
            | Arch::Mips64
            | Arch::Sparc64
            | Arch::Riscv64 => Some(8),
        }
    }
}

impl Default for Arch {
    fn default() -> Self {
        Arch::Unknown
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = UnknownArchError;

    fn from_str(string: &str) -> Result<Arch, UnknownArchError> {
        Ok(match string {
            "unknown" => Arch::Unknown,
            "x86" => Arch::X86,
            "x86_64" | "amd64" => Arch::Amd64,
            "arm" => Arch::Arm,
            "arm64" | "aarch64" => Arch::Arm64,
            "ppc" => Arch::Ppc,
            "ppc64" => Arch::Ppc64,
            "mips" => Arch::Mips,
            "mips64" => Arch::Mips64,
            "sparc64" | "sparcv9" => Arch::Sparc64,
            "riscv64" => Arch::Riscv64,
            _ => return Err(UnknownArchError),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_roundtrip() {
        let arch: Arch = "mips64".parse().unwrap();
        assert_eq!(arch, Arch::Mips64);
        assert_eq!(arch.name(), "mips64");
        assert_eq!(arch.pointer_size(), Some(8));
    }

    #[test]
    fn test_endianness_default_is_native() {
        assert_eq!(Endianness::default(), Endianness::NATIVE);
    }
}
