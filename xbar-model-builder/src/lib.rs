// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Derive macros for components that hold an `entity: Rc<Entity>` field.
//!
//! Both derives support generic components, for example
//! `Pipeline<T> where T: SimObject`.

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{DeriveInput, parse_macro_input};

/// Wrap `body` in `impl <trait_path> for <type>`, keeping the type's generics.
fn impl_for(input: &DeriveInput, trait_path: TokenStream, body: TokenStream) -> TokenStream {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    quote! {
        impl #impl_generics #trait_path for #ident #ty_generics #where_clause {
            #body
        }
    }
}

/// Display a component as the full name of its entity.
#[proc_macro_derive(EntityDisplay)]
pub fn entity_display(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    impl_for(
        &input,
        quote!(std::fmt::Display),
        quote! {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.entity, f)
            }
        },
    )
    .into()
}

/// Implement `xbar_track::entity::GetEntity` by returning the `entity` field.
#[proc_macro_derive(EntityGet)]
pub fn entity_get(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    impl_for(
        &input,
        quote!(xbar_track::entity::GetEntity),
        quote! {
            fn entity(&self) -> &std::rc::Rc<xbar_track::entity::Entity> {
                &self.entity
            }
        },
    )
    .into()
}
