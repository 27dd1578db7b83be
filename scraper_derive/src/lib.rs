#![allow(clippy::all)]
#![deny(unused_variables, clippy::unnecessary_mut_passed, unused_results)]

use convert_case::{Case, Casing};
use proc_macro::{self, TokenStream};
use quote::quote;
use syn::{parse_macro_input, DeriveInput, LitStr};

/// Wires a scrape module into the module set.
///
/// Generates `new(args)` on top of `LogicalModule::inner_new`, and `name()`
/// returning the snake case type name, e.g. `scrape_manager`, which is what
/// the lifecycle logs print. `LogicalModuleNewArgs` must be in scope.
#[proc_macro_derive(LogicalModule)]
pub fn logical_module_macro_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let DeriveInput {
        ident, generics, ..
    } = input;
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();
    let name = LitStr::new(&ident.to_string().to_case(Case::Snake), ident.span());

    let output = quote! {
        impl #impl_generics #ident #ty_generics #where_clause {
            pub fn new(args: LogicalModuleNewArgs) -> Self {
                tracing::debug!("new module {}", #name);
                Self::inner_new(args)
            }

            pub fn name() -> &'static str {
                #name
            }
        }
    };
    output.into()
}
