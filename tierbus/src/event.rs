//! 事件模型与类型提取
//!
//! - `Event`：任何能给出自身所属类型 ID 集合的值（一个事件可同时属于多个类型）；
//! - `EventClass`：事件“类”层面的能力，可在不实例化的情况下声明类型；
//! - `EventDescriptor`：类描述符，供处理器构建时计算订阅目标；
//! - `extract_types`：对多个描述符求去重并集。
//!
use std::any::{Any, type_name};
use std::sync::Arc;

/// 事件类型标识（引擎视其为不透明整数）
pub type EventTypeId = i64;

/// 有序、去重的事件类型集合
pub type EventTypes = Vec<EventTypeId>;

/// 引擎内部及处理器之间共享的事件引用
pub type EventRef = Arc<dyn Event>;

/// 可被发布的事件
pub trait Event: Send + Sync + 'static {
    /// 事件所属的全部类型，按声明顺序
    fn event_types(&self) -> EventTypes;

    /// 供处理器还原具体事件类型
    fn as_any(&self) -> &dyn Any;
}

impl dyn Event {
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Event>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// 事件类：在类级别声明类型，或提供一个可用于查询的实例
pub trait EventClass: Event + Sized {
    /// 类级别声明（零分配路径）；`None` 表示需要回退到实例化
    fn declared_types() -> Option<EventTypes> {
        None
    }

    /// 回退路径：构造一个样例实例
    fn instantiate() -> anyhow::Result<Self> {
        Err(anyhow::anyhow!(
            "{} cannot be instantiated for type discovery",
            type_name::<Self>()
        ))
    }
}

/// 事件类描述符
#[derive(Clone, Copy)]
pub struct EventDescriptor {
    name: &'static str,
    declared: fn() -> Option<EventTypes>,
    probe: fn() -> anyhow::Result<EventTypes>,
}

impl EventDescriptor {
    pub fn of<E: EventClass>() -> Self {
        Self {
            name: type_name::<E>(),
            declared: E::declared_types,
            probe: || E::instantiate().map(|event| event.event_types()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 解析该类贡献的类型；实例化失败视为不贡献任何类型
    pub fn resolve(&self) -> EventTypes {
        if let Some(types) = (self.declared)() {
            return types;
        }

        match (self.probe)() {
            Ok(types) => types,
            Err(err) => {
                tracing::debug!(class = self.name, error = %err, "event class contributed no types");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("name", &self.name)
            .finish()
    }
}

/// 多个事件类的类型并集（按首次出现顺序，去重）
pub fn extract_types(classes: &[EventDescriptor]) -> EventTypes {
    dedup_types(classes.iter().flat_map(|class| class.resolve()))
}

/// 按首次出现顺序去重
pub fn dedup_types(types: impl IntoIterator<Item = EventTypeId>) -> EventTypes {
    let mut out: EventTypes = Vec::new();
    for ty in types {
        if !out.contains(&ty) {
            out.push(ty);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Declared;
    impl Event for Declared {
        fn event_types(&self) -> EventTypes {
            unreachable!("declared classes are never instantiated")
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl EventClass for Declared {
        fn declared_types() -> Option<EventTypes> {
            Some(vec![1, 2])
        }
    }

    struct Probed;
    impl Event for Probed {
        fn event_types(&self) -> EventTypes {
            vec![2, 3]
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl EventClass for Probed {
        fn instantiate() -> anyhow::Result<Self> {
            Ok(Probed)
        }
    }

    struct Opaque;
    impl Event for Opaque {
        fn event_types(&self) -> EventTypes {
            vec![99]
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl EventClass for Opaque {}

    #[test]
    fn union_keeps_first_occurrence_order() {
        let types = extract_types(&[
            EventDescriptor::of::<Declared>(),
            EventDescriptor::of::<Probed>(),
        ]);
        assert_eq!(types, vec![1, 2, 3]);
    }

    #[test]
    fn failed_instantiation_contributes_nothing() {
        let types = extract_types(&[
            EventDescriptor::of::<Opaque>(),
            EventDescriptor::of::<Probed>(),
        ]);
        assert_eq!(types, vec![2, 3]);
    }

    #[test]
    fn downcast_returns_concrete_event() {
        let event: EventRef = Arc::new(Probed);
        assert!(event.is::<Probed>());
        assert!(event.downcast_ref::<Opaque>().is_none());
    }
}
