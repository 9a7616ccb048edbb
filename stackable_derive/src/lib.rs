//! Derive macro for `cutils::dataset::Stackable`.
//!
//! Every field of the struct must itself be `Stackable` with
//! `Output = Self`; the derived `stack` gathers each field across the
//! batch and stacks it.
//!
//! ```ignore
//! use cutils::dataset::Stackable;
//! use cutils::ml::Tensor;
//!
//! #[derive(Stackable)]
//! struct Sample {
//!     x: Tensor,
//!     y: Tensor,
//! }
//! ```

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields};

#[proc_macro_derive(Stackable)]
pub fn derive_stackable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand(input: DeriveInput) -> syn::Result<proc_macro2::TokenStream> {
    let name = &input.ident;
    let data = match &input.data {
        Data::Struct(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                &input.ident,
                "Stackable can only be derived for structs",
            ))
        }
    };
    let fields = match &data.fields {
        Fields::Named(f) => &f.named,
        other => {
            return Err(syn::Error::new_spanned(
                other,
                "Stackable needs named fields",
            ))
        }
    };

    let field_names: Vec<_> = fields.iter().filter_map(|f| f.ident.as_ref()).collect();
    let field_types: Vec<_> = fields.iter().map(|f| &f.ty).collect();
    let columns: Vec<_> = field_names
        .iter()
        .map(|f| format_ident!("__column_{}", f))
        .collect();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let predicates = where_clause.map(|w| &w.predicates);

    Ok(quote! {
        impl #impl_generics ::cutils::dataset::Stackable for #name #ty_generics
        where
            #( #field_types: ::cutils::dataset::Stackable<Output = #field_types>, )*
            #predicates
        {
            type Output = Self;

            fn stack(batch: ::std::vec::Vec<Self>) -> Self::Output {
                #( let mut #columns = ::std::vec::Vec::with_capacity(batch.len()); )*

                for item in batch {
                    #( #columns.push(item.#field_names); )*
                }

                #name {
                    #( #field_names: <#field_types as ::cutils::dataset::Stackable>::stack(#columns) ),*
                }
            }
        }
    })
}
