use crate::core::{ClassKind, FourCc, PropertyTable};

/// Static description of a driver class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassInfo {
    pub name: &'static str,
    pub kind: ClassKind,
    pub class_id: FourCc,
    pub base_class_id: FourCc,
}

/// Implemented through `#[derive(DriverClass)]`.
pub trait DriverClass: Sized + 'static {
    const CLASS: ClassInfo;

    fn property_table() -> &'static PropertyTable<Self>;
}

// Factory type for producing class descriptors at runtime
pub type ClassInfoFactory = fn() -> ClassInfo;

// Wrapper for inventory collection
pub struct ClassRegistration(pub ClassInfoFactory);

inventory::collect!(ClassRegistration);
