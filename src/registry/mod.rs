mod metadata;

pub use metadata::{ClassInfo, ClassInfoFactory, ClassRegistration, DriverClass};

use crate::core::FourCc;

/// Every class linked into the binary, ordered by class code.
pub fn registered_classes() -> Vec<ClassInfo> {
    let mut classes: Vec<ClassInfo> = inventory::iter::<ClassRegistration>
        .into_iter()
        .map(|registration| (registration.0)())
        .collect();
    classes.sort_by_key(|class| class.class_id);
    classes.dedup_by_key(|class| class.class_id);
    classes
}

pub fn find_class(class_id: FourCc) -> Option<ClassInfo> {
    registered_classes()
        .into_iter()
        .find(|class| class.class_id == class_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ClassKind;

    #[test]
    fn test_builtin_classes_are_registered() {
        let classes = registered_classes();
        let names: Vec<_> = classes.iter().map(|c| c.name).collect();

        assert!(names.contains(&"Device"));
        assert!(names.contains(&"Stream"));
        assert!(names.contains(&"VolumeControl"));
        assert!(names.contains(&"MuteControl"));
    }

    #[test]
    fn test_find_class_by_code() {
        let device = find_class(FourCc::new(*b"adev")).unwrap();
        assert_eq!(device.kind, ClassKind::Device);
        assert_eq!(device.base_class_id, FourCc::new(*b"aobj"));

        assert!(find_class(FourCc::new(*b"none")).is_none());
    }
}
