//! `EnvTarget` derive implementation.

use proc_macro2::{TokenStream, TokenTree};
use quote::{quote, ToTokens};
use syn::{parse_quote, DeriveInput, Ident};

use crate::parse::env_fields;

/// Expands `#[derive(EnvTarget)]`.
pub fn expand_env_target(input: TokenStream) -> syn::Result<TokenStream> {
    let input: DeriveInput = syn::parse2(input)?;
    let fields = env_fields(&input)?;

    let name = &input.ident;

    // Field types built from type parameters must be parseable themselves.
    let mut generics = input.generics.clone();
    let params: Vec<Ident> = generics.type_params().map(|p| p.ident.clone()).collect();
    let bounded: Vec<_> = fields
        .iter()
        .filter(|field| mentions_any(field.ty.to_token_stream(), &params))
        .map(|field| &field.ty)
        .collect();
    if !bounded.is_empty() {
        let where_clause = generics.make_where_clause();
        for ty in bounded {
            where_clause
                .predicates
                .push(parse_quote!(#ty: ::stratum::FromEnvValue));
        }
    }
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let bindings = fields.iter().map(|field| {
        let ident = &field.ident;
        let ty = &field.ty;
        let key = &field.key;
        quote! {
            ::stratum::env::bind_field::<#ty>(&mut self.#ident, prefix, #key, vars)?;
        }
    });
    let keys = fields.iter().map(|field| &field.key);

    Ok(quote! {
        impl #impl_generics ::stratum::EnvTarget for #name #ty_generics #where_clause {
            fn bind_env(
                &mut self,
                prefix: &str,
                vars: &dyn ::stratum::EnvLookup,
            ) -> ::stratum::ConfigResult<()> {
                #(#bindings)*
                ::core::result::Result::Ok(())
            }

            fn env_keys() -> &'static [&'static str] {
                &[#(#keys),*]
            }
        }
    })
}

fn mentions_any(tokens: TokenStream, idents: &[Ident]) -> bool {
    tokens.into_iter().any(|tt| match tt {
        TokenTree::Ident(ident) => idents.contains(&ident),
        TokenTree::Group(group) => mentions_any(group.stream(), idents),
        TokenTree::Punct(_) | TokenTree::Literal(_) => false,
    })
}
