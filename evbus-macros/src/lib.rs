//! evbus 过程宏
//!
mod event;
mod utils;

use proc_macro::TokenStream;
use syn::{Item, parse_macro_input};

/// 事件宏
/// - 追加字段：`base: ::evbus_core::EventBase`（若缺失）并置于字段最前
/// - 派生 `Debug`、`Clone`，并实现 `::evbus_core::Event`
/// - 支持参数：`#[event(event_type = "order.placed", debug = false)]`，
///   `event_type` 默认为结构体名
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as event::EventAttrConfig);
    let input = parse_macro_input!(item as Item);
    event::expand(cfg, input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}
