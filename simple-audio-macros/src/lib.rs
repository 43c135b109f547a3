use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, DeriveInput};

mod class_meta;
use class_meta::{parse_class_info, parse_properties};

/// Derives `DriverClass`: the class descriptor plus the selector table that
/// property dispatch runs through, registered with the class inventory.
#[proc_macro_derive(DriverClass, attributes(driver_class, property))]
pub fn derive_driver_class(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    if !input.generics.params.is_empty() {
        return syn::Error::new_spanned(&input.generics, "DriverClass cannot be derived for generic types")
            .to_compile_error()
            .into();
    }

    let class_info = match parse_class_info(&input) {
        Ok(info) => info,
        Err(e) => return e.write_errors().into(),
    };

    let properties = match parse_properties(&input) {
        Ok(props) => props,
        Err(e) => return e.write_errors().into(),
    };

    let struct_name = &input.ident;
    let class_name = &class_info.name;
    let kind = syn::Ident::new(&class_info.kind, struct_name.span());
    let class_id = syn::LitByteStr::new(class_info.class_id.as_bytes(), struct_name.span());
    let base_class = syn::LitByteStr::new(
        class_info.base_class.as_deref().unwrap_or("aobj").as_bytes(),
        struct_name.span(),
    );

    let entries = properties.iter().map(|prop| {
        let selector = syn::Ident::new(&prop.selector, struct_name.span());
        let getter = syn::Ident::new(&prop.get, struct_name.span());

        match &prop.set {
            Some(setter) => {
                let setter = syn::Ident::new(setter, struct_name.span());
                quote! {
                    .writable(crate::core::Selector::#selector, #struct_name::#getter, #struct_name::#setter)
                }
            }
            None => quote! {
                .readable(crate::core::Selector::#selector, #struct_name::#getter)
            },
        }
    });

    let mod_name = syn::Ident::new(
        &format!("__class_registration_{}", struct_name.to_string().to_lowercase()),
        struct_name.span(),
    );

    let expanded = quote! {
        impl crate::registry::DriverClass for #struct_name {
            const CLASS: crate::registry::ClassInfo = crate::registry::ClassInfo {
                name: #class_name,
                kind: crate::core::ClassKind::#kind,
                class_id: crate::core::FourCc::new(*#class_id),
                base_class_id: crate::core::FourCc::new(*#base_class),
            };

            fn property_table() -> &'static crate::core::PropertyTable<Self> {
                static TABLE: ::std::sync::OnceLock<crate::core::PropertyTable<#struct_name>> =
                    ::std::sync::OnceLock::new();
                TABLE.get_or_init(|| {
                    crate::core::PropertyTable::builder()
                        #(#entries)*
                        .build()
                })
            }
        }

        mod #mod_name {
            use super::*;

            fn class_info() -> crate::registry::ClassInfo {
                <#struct_name as crate::registry::DriverClass>::CLASS
            }

            ::inventory::submit! {
                crate::registry::ClassRegistration(class_info)
            }
        }
    };

    TokenStream::from(expanded)
}
