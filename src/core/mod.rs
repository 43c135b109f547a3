pub mod object;
pub mod object_map;
pub mod property;

pub use object::{ClassKind, DriverObject, ObjectCore, ObjectId, Retained};
pub use object_map::ObjectMap;
pub use property::{FourCc, PropertyTable, PropertyValue, Selector};

/// Routes the `DriverObject` property methods through the type's
/// `DriverClass` table. Expands inside an `impl DriverObject` block.
macro_rules! class_dispatch {
    () => {
        fn class(&self) -> $crate::registry::ClassInfo {
            <Self as $crate::registry::DriverClass>::CLASS
        }

        fn has_property(&self, selector: $crate::core::Selector) -> bool {
            <Self as $crate::registry::DriverClass>::property_table().contains(selector)
        }

        fn is_property_settable(&self, selector: $crate::core::Selector) -> $crate::Result<bool> {
            <Self as $crate::registry::DriverClass>::property_table().is_settable(self, selector)
        }

        fn get_property(&self, selector: $crate::core::Selector) -> $crate::Result<$crate::core::PropertyValue> {
            <Self as $crate::registry::DriverClass>::property_table().get(self, selector)
        }

        fn set_property(
            &self,
            selector: $crate::core::Selector,
            value: $crate::core::PropertyValue,
        ) -> $crate::Result<()> {
            <Self as $crate::registry::DriverClass>::property_table().set(self, selector, value)
        }

        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn into_any_arc(
            self: ::std::sync::Arc<Self>,
        ) -> ::std::sync::Arc<dyn ::std::any::Any + Send + Sync> {
            self
        }
    };
}

pub(crate) use class_dispatch;
