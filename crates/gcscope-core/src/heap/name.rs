//! Display names from raw descriptor symbols.

/// Suffix the symbol of a type's virtual table carries.
pub const VTABLE_SUFFIX: &str = "::`vftable'";

/// Separator between module and symbol name in a qualified symbol.
pub const MODULE_SEPARATOR: char = '!';

/// Appended to the name of array types.
pub const ARRAY_SUFFIX: &str = "[]";

/// Turn a raw symbol such as ``System.Private.CoreLib!System.String::`vftable'``
/// into a display name (`System.String`).
///
/// Best effort only: resolution never depends on the result.
pub fn derive_type_name(raw: &str, is_array: bool) -> String
{
    let name = raw.strip_suffix(VTABLE_SUFFIX).unwrap_or(raw);
    let name = match name.find(MODULE_SEPARATOR) {
        Some(separator) => &name[separator + MODULE_SEPARATOR.len_utf8()..],
        None => name,
    };

    if is_array {
        format!("{name}{ARRAY_SUFFIX}")
    } else {
        name.to_string()
    }
}
