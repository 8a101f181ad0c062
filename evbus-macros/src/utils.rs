use quote::ToTokens;
use syn::{Attribute, Field, FieldsNamed, Token, Type, punctuated::Punctuated};

// 提取非 derive 属性与已有 derive 列表
pub(crate) fn split_derives(attrs: &[Attribute]) -> (Vec<Attribute>, Vec<syn::Path>) {
    let mut retained = Vec::new();
    let mut existing = Vec::new();
    for attr in attrs {
        if !attr.path().is_ident("derive") {
            retained.push(attr.clone());
            continue;
        }
        if let Ok(list) = attr.parse_args_with(Punctuated::<syn::Path, Token![,]>::parse_terminated)
        {
            existing.extend(list);
        }
    }
    (retained, existing)
}

// 按最后一段路径去重：`Clone` 与 `std::clone::Clone` 视为同一个
fn derive_key(p: &syn::Path) -> String {
    p.segments
        .last()
        .map(|s| s.ident.to_string())
        .unwrap_or_else(|| p.to_token_stream().to_string())
}

/// 把 `required` 合并进结构体的 derive 列表（置于最前，去重）
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<syn::Path>) {
    let (retained, existing) = split_derives(attrs);
    let mut seen = std::collections::HashSet::new();
    let merged: Vec<syn::Path> = required
        .into_iter()
        .chain(existing)
        .filter(|p| seen.insert(derive_key(p)))
        .collect();
    let derive: Attribute = syn::parse_quote!(#[derive(#(#merged),*)]);
    *attrs = std::iter::once(derive).chain(retained).collect();
}

/// 缺失时在最前面插入字段，已存在则保持原样
pub(crate) fn ensure_leading_field(fields_named: &mut FieldsNamed, name: &syn::Ident, ty: &Type) {
    let exists = fields_named
        .named
        .iter()
        .any(|f| f.ident.as_ref() == Some(name));
    if exists {
        return;
    }
    let field: Field = syn::parse_quote! { #name: #ty };
    let mut named: Punctuated<Field, Token![,]> = Punctuated::new();
    named.push(field);
    named.extend(fields_named.named.clone());
    fields_named.named = named;
}
