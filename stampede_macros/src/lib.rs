use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{ItemFn, parse_macro_input};

extern crate proc_macro;

/// Turns an `async fn(ScenarioContext) -> ScenarioResult` into a function that
/// builds a registrable `Scenario` named after the function itself.
///
/// ```ignore
/// #[scenario]
/// async fn validate_email(ctx: ScenarioContext) -> ScenarioResult {
///     let res = ctx.get("/v1/addresses/validate").await?;
///     ctx.check("is status 200", res.status == Some(200));
///     Ok(())
/// }
///
/// let registry = Registry::new().register(validate_email());
/// ```
#[proc_macro_attribute]
pub fn scenario(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as ItemFn);
    let vis = ast.vis.clone();
    let name = ast.sig.ident.clone();
    let name_str = name.to_string();
    let action = format_ident!("__{}_action", name);

    let mut inner = ast;
    inner.sig.ident = action.clone();
    inner.vis = syn::Visibility::Inherited;

    let expanded = quote! {
        #inner

        #vis fn #name() -> ::stampede::Scenario {
            ::stampede::Scenario::new(#name_str, #action)
        }
    };

    TokenStream::from(expanded)
}
