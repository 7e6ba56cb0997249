//! Tests for error handling

use gcscope_core::error::{GcScopeError, GcScopeResult};
use gcscope_core::revision::{Revision, RevisionGuard};
use gcscope_core::types::Address;

#[test]
fn test_stale_revision_display()
{
    let error = GcScopeError::StaleRevision {
        held: Revision(1),
        current: Revision(2),
    };
    let message = format!("{error}");
    assert!(message.contains("Stale revision"));
    assert!(message.contains('1'));
    assert!(message.contains('2'));
    assert!(error.is_stale());
    assert!(!error.is_unsupported());
}

#[test]
fn test_unsupported_is_distinct()
{
    let error = GcScopeError::Unsupported("handle table".to_string());
    assert!(error.is_unsupported());
    assert!(!error.is_stale());
    assert!(format!("{error}").contains("handle table"));
}

#[test]
fn test_module_overlap_display()
{
    let error = GcScopeError::ModuleOverlap {
        base: Address::from(0x2000),
        existing: Address::from(0x1000),
    };
    let message = format!("{error}");
    assert!(message.contains("0x0000000000002000"));
    assert!(message.contains("0x0000000000001000"));
}

#[test]
fn test_io_error_conversion()
{
    let io = std::io::Error::other("worker spawn failed");
    let error: GcScopeError = io.into();
    assert!(matches!(error, GcScopeError::Io(_)));
    assert!(format!("{error}").contains("worker spawn failed"));
}

#[test]
fn test_revision_guard()
{
    let guard = RevisionGuard::stamp(Revision(3));
    assert!(guard.check(Revision(3)).is_ok());
    assert!(guard.is_current(Revision(3)));
    assert!(!guard.is_current(Revision(4)));

    let result: GcScopeResult<()> = guard.check(Revision(4));
    match result {
        Err(GcScopeError::StaleRevision { held, current }) => {
            assert_eq!(held, Revision(3));
            assert_eq!(current, Revision(4));
        }
        other => panic!("Expected StaleRevision, got {other:?}"),
    }
}
