use proc_macro::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{
    DeriveInput, Expr, Ident, Result, Token, parse::Parse, parse::ParseStream, parse_macro_input,
};

/// #[derive(Event)] 宏实现
/// - 读取唯一的 `#[event(types = [..])]` 属性
/// - 生成 `Event` 与 `EventClass` 两个实现，二者返回同一份类型列表
pub(crate) fn expand(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    let types = match parse_types(&input) {
        Ok(types) => types,
        Err(err) => return err.to_compile_error().into(),
    };

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    let elems = types.iter();

    let expanded = quote! {
        impl #impl_generics ::tierbus::event::Event for #ident #ty_generics #where_clause {
            fn event_types(&self) -> ::tierbus::event::EventTypes {
                <Self as ::tierbus::event::EventClass>::declared_types().unwrap_or_default()
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }

        impl #impl_generics ::tierbus::event::EventClass for #ident #ty_generics #where_clause {
            fn declared_types() -> ::std::option::Option<::tierbus::event::EventTypes> {
                ::std::option::Option::Some(::tierbus::event::dedup_types([
                    #( (#elems) as ::tierbus::event::EventTypeId ),*
                ]))
            }
        }
    };

    TokenStream::from(expanded)
}

fn parse_types(input: &DeriveInput) -> Result<Vec<Expr>> {
    let mut found: Option<Vec<Expr>> = None;

    for attr in input.attrs.iter().filter(|a| a.path().is_ident("event")) {
        let types = attr.parse_args_with(parse_types_arg)?;
        if found.is_some() {
            return Err(syn::Error::new(
                attr.span(),
                "duplicate #[event(...)] attribute",
            ));
        }
        found = Some(types);
    }

    found.ok_or_else(|| {
        syn::Error::new(
            input.ident.span(),
            "#[derive(Event)] requires #[event(types = [...])]",
        )
    })
}

// 解析：types = [expr, expr, ...]
fn parse_types_arg(input: ParseStream) -> Result<Vec<Expr>> {
    let key: Ident = input.parse()?;
    if key != "types" {
        return Err(syn::Error::new(
            key.span(),
            "unknown key in #[event(...)], expected `types`",
        ));
    }
    input.parse::<Token![=]>()?;

    let content;
    syn::bracketed!(content in input);
    let elems: Punctuated<Expr, Token![,]> = content.parse_terminated(Expr::parse, Token![,])?;

    // 允许末尾逗号
    if input.peek(Token![,]) {
        input.parse::<Token![,]>()?;
    }
    Ok(elems.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    fn error_of(input: DeriveInput) -> String {
        match parse_types(&input) {
            Ok(_) => panic!("expected attribute error"),
            Err(err) => err.to_string(),
        }
    }

    #[test]
    fn parses_type_list_with_trailing_comma() {
        let input: DeriveInput = parse_quote! {
            #[event(types = [1, Kind::Chat, 2 + 3,])]
            struct Ping;
        };
        assert_eq!(parse_types(&input).unwrap().len(), 3);
    }

    #[test]
    fn missing_attribute_is_rejected() {
        let input: DeriveInput = parse_quote! {
            struct Ping;
        };
        assert!(error_of(input).contains("requires #[event(types = [...])]"));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let input: DeriveInput = parse_quote! {
            #[event(kinds = [1])]
            struct Ping;
        };
        assert!(error_of(input).contains("unknown key"));
    }

    #[test]
    fn duplicate_attribute_is_rejected() {
        let input: DeriveInput = parse_quote! {
            #[event(types = [1])]
            #[event(types = [2])]
            struct Ping;
        };
        assert!(error_of(input).contains("duplicate"));
    }
}
