//! Metadata importer handle and the one attribute the engine decodes.
//!
//! General reflection is out of reach here: the engine only needs the
//! assembly's `DebuggableAttribute` to tell whether a module was built for
//! debugging. Everything else is left to whatever importer the runtime
//! collaborator hands out.

use std::fmt;

/// Read access to a module's metadata, bound to one domain-specific load
/// address.
///
/// Importers are built by the [`Runtime`](crate::runtime::Runtime) and
/// cached on the module after the first successful construction.
pub trait MetadataImport: Send + Sync
{
    /// Raw value blob of an assembly-level custom attribute, looked up by
    /// the attribute's full type name.
    fn assembly_attribute(&self, type_name: &str) -> Option<Vec<u8>>;
}

/// Full name of the attribute carrying the debugging flags.
pub const DEBUGGABLE_ATTRIBUTE: &str = "System.Diagnostics.DebuggableAttribute";

/// Custom attribute blob prolog (ECMA-335 II.23.3).
const ATTRIBUTE_PROLOG: [u8; 2] = [0x01, 0x00];

/// Flags of `System.Diagnostics.DebuggableAttribute.DebuggingModes`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DebuggingModes(u32);

impl DebuggingModes
{
    pub const NONE: Self = Self(0);
    pub const DEFAULT: Self = Self(0x1);
    pub const IGNORE_SYMBOL_STORE_SEQUENCE_POINTS: Self = Self(0x2);
    pub const ENABLE_EDIT_AND_CONTINUE: Self = Self(0x4);
    pub const DISABLE_OPTIMIZATIONS: Self = Self(0x100);

    pub const fn from_bits(bits: u32) -> Self
    {
        Self(bits)
    }

    pub const fn bits(self) -> u32
    {
        self.0
    }

    /// Returns `true` if every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool
    {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool
    {
        self.0 == 0
    }
}

impl fmt::Debug for DebuggingModes
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        const NAMES: &[(DebuggingModes, &str)] = &[
            (DebuggingModes::DEFAULT, "Default"),
            (DebuggingModes::IGNORE_SYMBOL_STORE_SEQUENCE_POINTS, "IgnoreSymbolStoreSequencePoints"),
            (DebuggingModes::ENABLE_EDIT_AND_CONTINUE, "EnableEditAndContinue"),
            (DebuggingModes::DISABLE_OPTIMIZATIONS, "DisableOptimizations"),
        ];

        if self.is_empty() {
            return write!(f, "DebuggingModes(None)");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "DebuggingModes({})", names.join(" | "))
    }
}

/// Decode a `DebuggableAttribute` value blob.
///
/// Both constructor forms put the interesting bits in the two bytes after
/// the prolog: `(bool tracking, bool optimizerDisabled)` stores them as two
/// booleans, `(DebuggingModes)` as the low half of an `int32`. Reading them
/// as `optimizer << 8 | tracking` yields the same flags either way.
///
/// Returns `None` for a malformed blob.
pub fn parse_debuggable_attribute(blob: &[u8]) -> Option<DebuggingModes>
{
    let (prolog, rest) = blob.split_first_chunk::<2>()?;
    if *prolog != ATTRIBUTE_PROLOG {
        return None;
    }
    let [low, high, ..] = rest else {
        return None;
    };
    Some(DebuggingModes::from_bits(u32::from(*high) << 8 | u32::from(*low)))
}
