use darling::{FromAttributes, FromMeta};
use syn::DeriveInput;

/// Parsed attributes from #[driver_class(...)]
#[derive(Debug, FromAttributes)]
#[darling(attributes(driver_class))]
pub struct ClassArgs {
    pub name: String,
    pub kind: String,
    pub class_id: String,
    #[darling(default)]
    pub base_class: Option<String>,
}

/// Parsed attributes from #[property(...)]
#[derive(Debug, FromMeta)]
pub struct PropertyArgs {
    pub selector: String,
    pub get: String,
    #[darling(default)]
    pub set: Option<String>,
}

pub fn parse_class_info(input: &DeriveInput) -> darling::Result<ClassArgs> {
    let args = ClassArgs::from_attributes(&input.attrs)?;

    let mut errors = darling::Error::accumulator();
    if !matches!(args.kind.as_str(), "Device" | "Stream" | "Control") {
        errors.push(darling::Error::custom(format!(
            "unknown object kind `{}`, expected Device, Stream or Control",
            args.kind
        )));
    }
    for code in std::iter::once(&args.class_id).chain(args.base_class.iter()) {
        if code.len() != 4 || !code.is_ascii() {
            errors.push(darling::Error::custom(format!(
                "class code `{}` must be exactly four ASCII characters",
                code
            )));
        }
    }
    errors.finish_with(args)
}

pub fn parse_properties(input: &DeriveInput) -> darling::Result<Vec<PropertyArgs>> {
    let mut errors = darling::Error::accumulator();

    let properties = input
        .attrs
        .iter()
        .filter(|attr| attr.path().is_ident("property"))
        .filter_map(|attr| errors.handle(PropertyArgs::from_meta(&attr.meta)))
        .collect();

    errors.finish_with(properties)
}
