use proc_macro::TokenStream;

mod event;

/// 事件派生宏
/// - 为目标类型实现 `::tierbus::event::Event`（`event_types/as_any`）
/// - 同时实现 `::tierbus::event::EventClass`，在类级别声明类型，构建处理器时无需实例化
/// - 参数：`#[event(types = [A, B, ...])]`，元素为任意可 `as i64` 的常量表达式
///   （例如无字段枚举的变体），重复项按首次出现去重
#[proc_macro_derive(Event, attributes(event))]
pub fn derive_event(input: TokenStream) -> TokenStream {
    event::expand(input)
}
