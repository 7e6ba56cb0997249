//! # Heap Configuration
//!
//! Tunables for a [`Heap`](crate::heap::Heap) and the module index it builds.
//!
//! Defaults suit current runtimes. [`HeapConfig::from_env`] layers environment
//! overrides on top of them:
//!
//! - `GCSCOPE_PREFETCH`: `0`/`false`/`off` disables background binary prefetch
//! - `GCSCOPE_CORE_MODULES`: comma separated list of runtime core module names
//! - `GCSCOPE_PAGE_SIZE`: page size of the heap-local read cache (power of two)
//!
//! ```rust,no_run
//! use gcscope_core::config::HeapConfig;
//!
//! let config = HeapConfig::from_env();
//! assert!(config.page_size.is_power_of_two());
//! ```

use std::env;

use tracing::warn;

use crate::error::{GcScopeError, GcScopeResult};

/// Low bits the runtime uses for in-place flags on descriptor pointers.
pub const DEFAULT_TAG_MASK: u64 = !0b11;

/// Default page size of the heap-local read cache.
pub const DEFAULT_PAGE_SIZE: u64 = 0x1000;

/// Smallest accepted page size.
pub const MIN_PAGE_SIZE: u64 = 64;

/// File stems of modules that host the runtime's own type system.
pub const DEFAULT_CORE_MODULES: &[&str] = &[
    "mrt100_app",
    "mrt100",
    "System.Private.CoreLib",
    "mscorlib",
    "coreclr",
    "clr",
];

/// Heap and module-index configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapConfig
{
    /// Mask applied to raw descriptor pointers before lookup
    pub tag_mask: u64,
    /// Whether module construction may schedule background prefetches
    pub prefetch: bool,
    /// Names matched (case-insensitively, against the file stem) to locate
    /// the module that owns types no other module contains
    pub core_module_names: Vec<String>,
    /// Page size of the heap-local read cache
    pub page_size: u64,
}

impl Default for HeapConfig
{
    fn default() -> Self
    {
        Self {
            tag_mask: DEFAULT_TAG_MASK,
            prefetch: true,
            core_module_names: DEFAULT_CORE_MODULES.iter().map(|name| (*name).to_string()).collect(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl HeapConfig
{
    /// Defaults with environment overrides applied.
    ///
    /// Values that do not parse are ignored (with a warning) and the default
    /// is kept.
    #[must_use]
    pub fn from_env() -> Self
    {
        let mut config = Self::default();

        if let Ok(value) = env::var("GCSCOPE_PREFETCH") {
            match parse_switch(&value) {
                Some(enabled) => config.prefetch = enabled,
                None => warn!("Ignoring GCSCOPE_PREFETCH={value}: expected on/off"),
            }
        }

        if let Ok(value) = env::var("GCSCOPE_CORE_MODULES") {
            let names = parse_name_list(&value);
            if names.is_empty() {
                warn!("Ignoring empty GCSCOPE_CORE_MODULES");
            } else {
                config.core_module_names = names;
            }
        }

        if let Ok(value) = env::var("GCSCOPE_PAGE_SIZE") {
            match parse_page_size(&value) {
                Some(size) => config.page_size = size,
                None => warn!("Ignoring GCSCOPE_PAGE_SIZE={value}: expected a power of two"),
            }
        }

        config
    }

    /// Check values that [`HeapConfig::from_env`] would have rejected.
    ///
    /// ## Errors
    ///
    /// `InvalidArgument` if `page_size` is not a power of two of at least
    /// [`MIN_PAGE_SIZE`].
    pub fn validate(&self) -> GcScopeResult<()>
    {
        if !is_valid_page_size(self.page_size) {
            return Err(GcScopeError::InvalidArgument(format!(
                "page size {} is not a power of two >= {MIN_PAGE_SIZE}",
                self.page_size
            )));
        }
        Ok(())
    }

    /// Returns `true` if `file_name` names one of the runtime core modules.
    pub fn is_core_module(&self, file_name: &str) -> bool
    {
        let stem = file_stem(file_name);
        self.core_module_names.iter().any(|name| name.eq_ignore_ascii_case(stem))
    }
}

/// Strip directories and the final extension from a module path.
pub(crate) fn file_stem(path: &str) -> &str
{
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

fn parse_switch(value: &str) -> Option<bool>
{
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

fn parse_name_list(value: &str) -> Vec<String>
{
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_page_size(value: &str) -> Option<u64>
{
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok()?,
        None => trimmed.parse().ok()?,
    };
    is_valid_page_size(parsed).then_some(parsed)
}

fn is_valid_page_size(size: u64) -> bool
{
    size >= MIN_PAGE_SIZE && size.is_power_of_two()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_switch()
    {
        assert_eq!(parse_switch("off"), Some(false));
        assert_eq!(parse_switch(" TRUE "), Some(true));
        assert_eq!(parse_switch("0"), Some(false));
        assert_eq!(parse_switch("maybe"), None);
    }

    #[test]
    fn test_parse_name_list_skips_blanks()
    {
        assert_eq!(parse_name_list("coreclr, ,mrt100"), vec!["coreclr".to_string(), "mrt100".to_string()]);
        assert!(parse_name_list(" , ").is_empty());
    }

    #[test]
    fn test_parse_page_size()
    {
        assert_eq!(parse_page_size("4096"), Some(4096));
        assert_eq!(parse_page_size("0x2000"), Some(0x2000));
        assert_eq!(parse_page_size("3000"), None);
        assert_eq!(parse_page_size("16"), None);
    }

    #[test]
    fn test_validate_page_size()
    {
        assert!(HeapConfig::default().validate().is_ok());
        for page_size in [0, 32, 3000] {
            let config = HeapConfig {
                page_size,
                ..HeapConfig::default()
            };
            assert!(matches!(config.validate(), Err(GcScopeError::InvalidArgument(_))));
        }
    }

    #[test]
    fn test_core_module_matching()
    {
        let config = HeapConfig::default();
        assert!(config.is_core_module(r"C:\app\mrt100_app.dll"));
        assert!(config.is_core_module("/usr/share/dotnet/System.Private.CoreLib.dll"));
        assert!(config.is_core_module("MSCORLIB.DLL"));
        assert!(!config.is_core_module("app.dll"));
    }

    #[test]
    fn test_file_stem()
    {
        assert_eq!(file_stem("/a/b/libfoo.so"), "libfoo");
        assert_eq!(file_stem(r"C:\x\y.dll"), "y");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }
}
