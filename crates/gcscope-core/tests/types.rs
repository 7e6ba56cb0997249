//! Tests for address and identifier types

use gcscope_core::types::{Address, DomainId, ModuleId, ThreadId};

#[test]
fn test_address_masking()
{
    let tagged = Address::from(0x7f00_1003);
    assert_eq!(tagged.masked(!0b11), Address::from(0x7f00_1000));
    assert_eq!(Address::from(0x7f00_1000).masked(!0b11), Address::from(0x7f00_1000));
}

#[test]
fn test_address_arithmetic()
{
    let base = Address::from(0x1000);
    assert_eq!((base + 0x18).value(), 0x1018);
    assert_eq!(Address::from(0x1018) - base, 0x18);
    assert_eq!(Address::from(u64::MAX).checked_add(1), None);
    assert_eq!(Address::from(u64::MAX).saturating_add(1), Address::from(u64::MAX));
    assert_eq!(Address::from(0x1001).checked_align_up(8), Some(Address::from(0x1008)));
}

#[test]
fn test_address_null()
{
    assert!(Address::ZERO.is_null());
    assert!(Address::default().is_null());
    assert!(!Address::from(1).is_null());
}

#[test]
fn test_address_display()
{
    assert_eq!(format!("{}", Address::from(0x1000)), "0x0000000000001000");
    assert_eq!(format!("{:x}", Address::from(0xbeef)), "beef");
}

#[test]
fn test_module_id_synthetic()
{
    let real = ModuleId::from_base(Address::from(0x40_0000));
    assert!(!real.is_synthetic());
    assert_eq!(real.raw(), 0x40_0000);

    let first = ModuleId::synthetic(0);
    let second = ModuleId::synthetic(1);
    assert!(first.is_synthetic());
    assert_ne!(first, second);
    assert_ne!(first, real);
}

#[test]
fn test_domain_and_thread_ids()
{
    let domain = DomainId(Address::from(0xd000));
    assert_eq!(domain.address(), Address::from(0xd000));
    assert!(format!("{domain}").starts_with("domain@"));

    let thread = ThreadId::from(0x1a2b);
    assert_eq!(thread.raw(), 0x1a2b);
}
