//! Parsing utilities for the `EnvTarget` derive.
//!
//! This module turns `#[env(...)]` field attributes into [`EnvField`]s.

use syn::{
    spanned::Spanned, Attribute, Data, DeriveInput, Expr, ExprLit, Fields, Ident, Lit, LitStr,
    Meta, Type,
};

/// What an `env` attribute asks for.
#[derive(Debug, PartialEq, Eq)]
pub enum EnvAttr {
    /// Bind the field to this key.
    Key(String),
    /// Never bind the field.
    Skip,
}

impl EnvAttr {
    /// Parses a single `#[env ...]` attribute.
    pub fn from_attribute(attr: &Attribute) -> syn::Result<Self> {
        match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(s), ..
                }) => Self::from_key(s),
                other => Err(syn::Error::new(other.span(), "expected string literal")),
            },
            Meta::List(list) => {
                if let Ok(key) = list.parse_args::<LitStr>() {
                    return Self::from_key(&key);
                }
                let ident: Ident = list.parse_args().map_err(|_| {
                    syn::Error::new(
                        list.tokens.span(),
                        "expected a string literal key or `skip`",
                    )
                })?;
                if ident == "skip" {
                    Ok(Self::Skip)
                } else {
                    Err(syn::Error::new(
                        ident.span(),
                        format!("unknown env option: {ident}"),
                    ))
                }
            }
            Meta::Path(path) => Err(syn::Error::new(
                path.span(),
                "expected #[env(\"KEY\")], #[env = \"KEY\"] or #[env(skip)]",
            )),
        }
    }

    fn from_key(lit: &LitStr) -> syn::Result<Self> {
        match lit.value().as_str() {
            "" => Err(syn::Error::new(lit.span(), "env key must not be empty")),
            "-" => Ok(Self::Skip),
            key => Ok(Self::Key(key.to_string())),
        }
    }
}

/// A struct field bound to an environment variable.
#[derive(Debug)]
pub struct EnvField {
    /// The field name.
    pub ident: Ident,
    /// The field type.
    pub ty: Type,
    /// The variable key without prefix.
    pub key: String,
}

/// Collects the bound fields of a struct, in declaration order.
pub fn env_fields(input: &DeriveInput) -> syn::Result<Vec<EnvField>> {
    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return Err(syn::Error::new(
                    input.ident.span(),
                    "EnvTarget can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new(
                input.ident.span(),
                "EnvTarget can only be derived for structs",
            ))
        }
    };

    let mut bound = Vec::new();
    for field in fields {
        let mut attr = None;
        for a in field.attrs.iter().filter(|a| a.path().is_ident("env")) {
            if attr.is_some() {
                return Err(syn::Error::new(a.span(), "duplicate env attribute"));
            }
            attr = Some(EnvAttr::from_attribute(a)?);
        }

        if let Some(EnvAttr::Key(key)) = attr {
            // Named fields always carry an ident.
            if let Some(ident) = field.ident.clone() {
                bound.push(EnvField {
                    ident,
                    ty: field.ty.clone(),
                    key,
                });
            }
        }
    }

    Ok(bound)
}
