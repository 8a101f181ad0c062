use crate::utils::{apply_derives, ensure_leading_field};
use proc_macro2::TokenStream;
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, Ident, Item, Result, Token, Type, parse::Parse, parse::ParseStream};

/// #[event] 宏实现
/// - 仅支持具名字段结构体
/// - 缺失时在最前面追加 `base: ::evbus_core::EventBase`
/// - 合并派生 `Debug`（`debug = false` 时省略）与 `Clone`
/// - 生成 `::evbus_core::Event` 实现，`TYPE` 默认为结构体名
pub(crate) fn expand(cfg: EventAttrConfig, input: Item) -> Result<TokenStream> {
    let mut st = match input {
        Item::Struct(s) => s,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "#[event] can only be used on struct types",
            ));
        }
    };

    let base_ident: Ident = syn::parse_quote!(base);
    let base_ty: Type = syn::parse_quote!(::evbus_core::EventBase);
    match &mut st.fields {
        syn::Fields::Named(fields_named) => {
            ensure_leading_field(fields_named, &base_ident, &base_ty);
        }
        other => {
            return Err(syn::Error::new(
                other.span(),
                "#[event] supports only named-field structs, e.g., struct X { a: T }",
            ));
        }
    }

    let mut required: Vec<syn::Path> = Vec::new();
    if cfg.debug {
        required.push(syn::parse_quote!(Debug));
    }
    required.push(syn::parse_quote!(Clone));
    apply_derives(&mut st.attrs, required);

    let ident = &st.ident;
    let event_type = cfg
        .event_type
        .unwrap_or_else(|| syn::LitStr::new(&ident.to_string(), ident.span()));
    let (impl_generics, ty_generics, where_clause) = st.generics.split_for_impl();

    Ok(quote! {
        #st

        impl #impl_generics ::evbus_core::Event for #ident #ty_generics #where_clause {
            const TYPE: &'static str = #event_type;

            fn base(&self) -> &::evbus_core::EventBase {
                &self.base
            }

            fn base_mut(&mut self) -> &mut ::evbus_core::EventBase {
                &mut self.base
            }
        }
    })
}

// -------- parsing --------

pub(crate) struct EventAttrConfig {
    event_type: Option<syn::LitStr>,
    debug: bool,
}

struct EventAttrKv {
    key: Ident,
    _eq: Token![=],
    value: Expr,
}

impl Parse for EventAttrKv {
    fn parse(input: ParseStream) -> Result<Self> {
        Ok(Self {
            key: input.parse()?,
            _eq: input.parse()?,
            value: input.parse()?,
        })
    }
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut event_type: Option<syn::LitStr> = None;
        let mut debug: Option<bool> = None;

        let pairs = Punctuated::<EventAttrKv, Token![,]>::parse_terminated(input)?;
        for kv in pairs {
            match kv.key.to_string().as_str() {
                "event_type" => {
                    if event_type.is_some() {
                        return Err(syn::Error::new(
                            kv.key.span(),
                            "duplicate key 'event_type' in attribute",
                        ));
                    }
                    match kv.value {
                        Expr::Lit(syn::ExprLit {
                            lit: syn::Lit::Str(lit),
                            ..
                        }) if !lit.value().is_empty() => event_type = Some(lit),
                        other => {
                            return Err(syn::Error::new(
                                other.span(),
                                "expected non-empty string literal for 'event_type'",
                            ));
                        }
                    }
                }
                "debug" => {
                    if debug.is_some() {
                        return Err(syn::Error::new(
                            kv.key.span(),
                            "duplicate key 'debug' in attribute",
                        ));
                    }
                    match kv.value {
                        Expr::Lit(syn::ExprLit {
                            lit: syn::Lit::Bool(b),
                            ..
                        }) => debug = Some(b.value),
                        other => {
                            return Err(syn::Error::new(
                                other.span(),
                                "expected boolean literal for 'debug'",
                            ));
                        }
                    }
                }
                other => {
                    return Err(syn::Error::new(
                        kv.key.span(),
                        format!("unknown key '{other}', expected 'event_type' or 'debug'"),
                    ));
                }
            }
        }

        Ok(Self {
            event_type,
            debug: debug.unwrap_or(true),
        })
    }
}
