//! Proc macros for the next-prefs crate.
//!
//! This crate provides the `#[derive(Schema)]` macro

use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, Type, parse_macro_input, spanned::Spanned};

/// Options parsed from a field's `#[schema(...)]` attribute.
#[derive(Default)]
struct FieldOptions {
    skip: bool,
    registry: bool,
}

impl FieldOptions {
    fn from_attrs(attrs: &[syn::Attribute]) -> syn::Result<Self> {
        let mut options = Self::default();

        for attr in attrs {
            if attr.path().is_ident("schema") {
                attr.parse_nested_meta(|meta| {
                    if meta.path.is_ident("skip") {
                        options.skip = true;
                    } else if meta.path.is_ident("registry") {
                        options.registry = true;
                    } else {
                        return Err(syn::Error::new(
                            meta.path.span(),
                            format!("unknown schema attribute: {:?}", meta.path.get_ident()),
                        ));
                    }
                    Ok(())
                })?;
            }
        }

        if options.skip && options.registry {
            return Err(syn::Error::new(
                proc_macro2::Span::call_site(),
                "a field cannot be both `skip` and `registry`",
            ));
        }

        Ok(options)
    }
}

enum FieldKind {
    Registry,
    Variable,
    Other,
}

/// Classifies a field by the last segment of its type path, so both `Pref<u16>`
/// and `next_prefs::Pref<u16>` are recognised.
fn kind_of(ty: &Type) -> FieldKind {
    let Type::Path(path) = ty else {
        return FieldKind::Other;
    };
    match path.path.segments.last() {
        Some(segment) if segment.ident == "Registry" => FieldKind::Registry,
        Some(segment) if segment.ident == "Pref" => FieldKind::Variable,
        _ => FieldKind::Other,
    }
}

/// Derive macro for the `Schema` trait.
///
/// The struct must have named fields, exactly one of which is a `Registry`.
/// Every `Pref<_>` field becomes a variable, in field order. Use
/// `#[schema(skip)]` to leave a `Pref` out, and `#[schema(registry)]` when the
/// registry sits behind a type alias.
///
/// # Example
///
/// ```rust,ignore
/// use next_prefs::{Pref, Registry, Schema};
///
/// #[derive(Schema)]
/// struct NetPrefs {
///     registry: Registry,
///     port: Pref<u16>,
///     name: Pref<String>,
/// }
/// ```
///
/// This expands to roughly:
///
/// ```rust,ignore
/// impl next_prefs::Schema for NetPrefs {
///     fn registry(&self) -> &next_prefs::Registry {
///         &self.registry
///     }
///
///     fn registry_mut(&mut self) -> &mut next_prefs::Registry {
///         &mut self.registry
///     }
///
///     fn variables(&self) -> Vec<&dyn next_prefs::Variable> {
///         vec![&self.port, &self.name]
///     }
///
///     fn variables_mut(&mut self) -> Vec<&mut dyn next_prefs::Variable> {
///         vec![&mut self.port, &mut self.name]
///     }
/// }
/// ```
#[proc_macro_derive(Schema, attributes(schema))]
pub fn derive_schema(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_schema_impl(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn derive_schema_impl(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new(
                    input.ident.span(),
                    "Schema can only be derived for structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.ident.span(),
                "Schema can only be derived for structs",
            ));
        }
    };

    let mut registry: Option<&Ident> = None;
    let mut variables: Vec<&Ident> = Vec::new();

    for field in fields {
        let options = FieldOptions::from_attrs(&field.attrs)?;
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        if options.skip {
            continue;
        }

        let kind = if options.registry {
            FieldKind::Registry
        } else {
            kind_of(&field.ty)
        };

        match kind {
            FieldKind::Registry => {
                if registry.replace(ident).is_some() {
                    return Err(syn::Error::new(
                        ident.span(),
                        "only one `Registry` field is allowed",
                    ));
                }
            }
            FieldKind::Variable => variables.push(ident),
            FieldKind::Other => {}
        }
    }

    let registry = registry.ok_or_else(|| {
        syn::Error::new(
            input.ident.span(),
            "missing a `Registry` field (mark aliased ones with #[schema(registry)])",
        )
    })?;

    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::next_prefs::Schema for #name #ty_generics #where_clause {
            fn registry(&self) -> &::next_prefs::Registry {
                &self.#registry
            }

            fn registry_mut(&mut self) -> &mut ::next_prefs::Registry {
                &mut self.#registry
            }

            fn variables(&self) -> ::std::vec::Vec<&dyn ::next_prefs::Variable> {
                ::std::vec![#(&self.#variables as &dyn ::next_prefs::Variable),*]
            }

            fn variables_mut(&mut self) -> ::std::vec::Vec<&mut dyn ::next_prefs::Variable> {
                ::std::vec![#(&mut self.#variables as &mut dyn ::next_prefs::Variable),*]
            }
        }
    })
}
