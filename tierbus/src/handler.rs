//! 处理器记录（Handler）与构建器
//!
//! 处理器一经构建即不可变：字段私有、仅提供只读访问；构建器为 typestate，
//! 同一字段重复设置或重复完成构建都会在编译期报错。
//! 订阅目标在构建器创建时一次性计算（见 `Handler::on`）。
//!
use crate::event::{EventClass, EventDescriptor, EventRef, EventTypeId, EventTypes};
use crate::event::{dedup_types, extract_types};
use bon::Builder;
use futures_util::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

// 导入由 bon::Builder 生成的 typestate 模块与状态转换别名
use self::handler_builder::{IsComplete, IsUnset, SetHandle, State as BuilderState};

/// 处理函数：接收事件，异步返回是否成功
pub type HandleFn = Arc<dyn Fn(EventRef) -> BoxFuture<'static, anyhow::Result<bool>> + Send + Sync>;

/// 共享的处理器引用；引擎以 `HandlerId` 判定同一性
pub type HandlerRef = Arc<Handler>;

/// 处理器实例标识，每次构建分配一个新值
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        HandlerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler#{}", self.0)
    }
}

/// 订阅记录
#[derive(Builder)]
#[builder(
    start_fn(name = for_targets, vis = "pub(crate)"),
    finish_fn(name = build_record, vis = "")
)]
pub struct Handler {
    #[builder(start_fn)]
    targets: EventTypes,
    #[builder(skip = HandlerId::next())]
    id: HandlerId,
    /// 越大越先执行；相同优先级并发执行
    #[builder(default)]
    priority: i64,
    /// 成功后阻断更低优先级
    #[builder(default)]
    block: bool,
    /// 毫秒；0 表示不限时
    #[builder(default)]
    timeout_ms: u64,
    #[builder(into)]
    name: Option<String>,
    #[builder(setters(name = handle_fn, vis = ""))]
    handle: HandleFn,
}

impl Handler {
    /// 以事件类描述符开始构建
    pub fn on(classes: &[EventDescriptor]) -> HandlerBuilder {
        Self::for_targets(extract_types(classes))
    }

    /// 订阅单个事件类
    pub fn on_class<E: EventClass>() -> HandlerBuilder {
        Self::on(&[EventDescriptor::of::<E>()])
    }

    /// 直接以类型 ID 开始构建（重复项会被合并）
    pub fn on_types(types: impl IntoIterator<Item = EventTypeId>) -> HandlerBuilder {
        Self::for_targets(dedup_types(types))
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn targets(&self) -> &[EventTypeId] {
        &self.targets
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn block(&self) -> bool {
        self.block
    }

    /// 生效的超时；未设置时为 `None`
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// 日志中使用的名称
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{name}({})", self.id),
            None => self.id.to_string(),
        }
    }

    pub(crate) fn invoke(&self, event: EventRef) -> BoxFuture<'static, anyhow::Result<bool>> {
        (self.handle)(event)
    }
}

impl<S: BuilderState> HandlerBuilder<S> {
    /// 设置处理函数并完成构建
    pub fn handle<F, Fut>(self, f: F) -> HandlerRef
    where
        S::Handle: IsUnset,
        SetHandle<S>: IsComplete,
        F: Fn(EventRef) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        let handle: HandleFn = Arc::new(
            move |event: EventRef| -> BoxFuture<'static, anyhow::Result<bool>> {
                Box::pin(f(event))
            },
        );
        Arc::new(self.handle_fn(handle).build_record())
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("targets", &self.targets)
            .field("priority", &self.priority)
            .field("block", &self.block)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use std::any::Any;

    struct Ping;
    impl Event for Ping {
        fn event_types(&self) -> EventTypes {
            vec![7]
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }
    impl EventClass for Ping {
        fn declared_types() -> Option<EventTypes> {
            Some(vec![7, 1])
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let h = Handler::on_class::<Ping>().handle(|_| async { Ok(true) });
        assert_eq!(h.targets(), &[7, 1]);
        assert_eq!(h.priority(), 0);
        assert!(!h.block());
        assert_eq!(h.timeout(), None);
        assert_eq!(h.name(), None);
    }

    #[test]
    fn targets_are_deduplicated() {
        let h = Handler::on_types([3, 1, 3, 2, 1])
            .priority(4)
            .block(true)
            .timeout_ms(25)
            .name("audit")
            .handle(|_| async { Ok(false) });
        assert_eq!(h.targets(), &[3, 1, 2]);
        assert_eq!(h.priority(), 4);
        assert!(h.block());
        assert_eq!(h.timeout(), Some(Duration::from_millis(25)));
        assert!(h.label().starts_with("audit("));
    }

    #[test]
    fn every_build_is_a_distinct_identity() {
        let a = Handler::on_types([1]).handle(|_| async { Ok(true) });
        let b = Handler::on_types([1]).handle(|_| async { Ok(true) });
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn invoke_runs_the_handle_fn() {
        let h = Handler::on_types([7]).handle(|event: EventRef| async move {
            Ok(event.downcast_ref::<Ping>().is_some())
        });
        assert!(h.invoke(Arc::new(Ping)).await.unwrap());
    }
}
