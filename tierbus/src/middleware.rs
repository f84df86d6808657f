//! 中间件链（Middleware）
//!
//! 八个挂载点共用两种组合子：
//! - `Chain<P>`：before* 挂载点，按注册顺序左折叠，`cancel` 置位后立即短路；
//!   拦截器返回 `None` 时沿用上一个累加值；
//! - `Observers<P>`：after* 挂载点，单纯广播，无取消能力。
//!
//! 拦截器返回的错误不做吞没，直接以 `EngineError::Middleware` 向上传播。
//!
use crate::error::{EngineError, EngineResult, Hook};
use crate::event::EventRef;
use crate::handler::HandlerRef;
use parking_lot::RwLock;
use std::sync::Arc;

/// 折叠状态：载荷 + 取消标记
#[derive(Clone, Debug)]
pub struct Intercept<P> {
    pub payload: P,
    pub cancel: bool,
}

impl<P> Intercept<P> {
    /// 继续（可替换载荷）
    pub fn pass(payload: P) -> Self {
        Self {
            payload,
            cancel: false,
        }
    }

    /// 取消当前阶段
    pub fn cancel(payload: P) -> Self {
        Self {
            payload,
            cancel: true,
        }
    }
}

/// priority 检查阶段的载荷；`priority` 仅供参考，修改不生效
#[derive(Clone, Debug)]
pub struct TierCheck {
    pub priority: i64,
    pub handlers: Vec<HandlerRef>,
}

/// 发布结束时的观察载荷
#[derive(Clone)]
pub struct PublishReport {
    pub event: EventRef,
    /// 返回 true 的处理器（截至阻断者为止）
    pub executed: Vec<HandlerRef>,
}

pub type Interceptor<P> = Arc<dyn Fn(&P) -> anyhow::Result<Option<Intercept<P>>> + Send + Sync>;

pub type Observer<P> = Arc<dyn Fn(&P) -> anyhow::Result<()> + Send + Sync>;

/// before* 挂载点
pub struct Chain<P> {
    hook: Hook,
    interceptors: RwLock<Vec<Interceptor<P>>>,
}

impl<P: Clone> Chain<P> {
    pub fn new(hook: Hook) -> Self {
        Self {
            hook,
            interceptors: RwLock::new(Vec::new()),
        }
    }

    pub fn push(&self, interceptor: Interceptor<P>) {
        self.interceptors.write().push(interceptor);
    }

    /// 以 `seed` 为初值执行左折叠
    pub fn run(&self, seed: P) -> EngineResult<Intercept<P>> {
        // 拷贝快照，拦截器内部可以继续注册中间件而不会死锁
        let interceptors = self.interceptors.read().clone();
        let mut acc = Intercept::pass(seed);

        for interceptor in interceptors {
            if acc.cancel {
                break;
            }
            match interceptor(&acc.payload) {
                Ok(Some(next)) => acc = next,
                Ok(None) => {}
                Err(err) => return Err(EngineError::middleware(self.hook, err)),
            }
        }

        if acc.cancel {
            tracing::debug!(hook = %self.hook, "middleware cancelled");
        }
        Ok(acc)
    }
}

/// after* 挂载点
pub struct Observers<P> {
    hook: Hook,
    observers: RwLock<Vec<Observer<P>>>,
}

impl<P> Observers<P> {
    pub fn new(hook: Hook) -> Self {
        Self {
            hook,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn push(&self, observer: Observer<P>) {
        self.observers.write().push(observer);
    }

    pub fn notify(&self, payload: &P) -> EngineResult<()> {
        let observers = self.observers.read().clone();
        for observer in observers {
            observer(payload).map_err(|err| EngineError::middleware(self.hook, err))?;
        }
        Ok(())
    }
}

/// 引擎持有的全部挂载点
pub(crate) struct Middleware {
    pub(crate) before_register: Chain<HandlerRef>,
    pub(crate) after_register: Observers<HandlerRef>,
    pub(crate) before_unregister: Chain<HandlerRef>,
    pub(crate) after_unregister: Observers<HandlerRef>,
    pub(crate) before_publish: Chain<EventRef>,
    pub(crate) before_priority_check: Chain<TierCheck>,
    pub(crate) before_block_check: Chain<HandlerRef>,
    pub(crate) after_publish: Observers<PublishReport>,
}

impl Default for Middleware {
    fn default() -> Self {
        Self {
            before_register: Chain::new(Hook::BeforeRegister),
            after_register: Observers::new(Hook::AfterRegister),
            before_unregister: Chain::new(Hook::BeforeUnregister),
            after_unregister: Observers::new(Hook::AfterUnregister),
            before_publish: Chain::new(Hook::BeforePublish),
            before_priority_check: Chain::new(Hook::BeforePriorityCheck),
            before_block_check: Chain::new(Hook::BeforeBlockCheck),
            after_publish: Observers::new(Hook::AfterPublish),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn interceptor(
        f: impl Fn(&i32) -> anyhow::Result<Option<Intercept<i32>>> + Send + Sync + 'static,
    ) -> Interceptor<i32> {
        Arc::new(f)
    }

    #[test]
    fn later_interceptor_sees_earlier_substitution() {
        let chain = Chain::new(Hook::BeforePublish);
        chain.push(interceptor(|v| Ok(Some(Intercept::pass(v + 1)))));
        chain.push(interceptor(|v| Ok(Some(Intercept::pass(v * 10)))));

        let out = chain.run(1).unwrap();
        assert_eq!(out.payload, 20);
        assert!(!out.cancel);
    }

    #[test]
    fn none_keeps_previous_accumulator() {
        let chain = Chain::new(Hook::BeforePublish);
        chain.push(interceptor(|v| Ok(Some(Intercept::pass(v + 1)))));
        chain.push(interceptor(|_| Ok(None)));

        assert_eq!(chain.run(5).unwrap().payload, 6);
    }

    #[test]
    fn cancel_short_circuits_remaining_interceptors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = Chain::new(Hook::BeforeRegister);
        chain.push(interceptor(|v| Ok(Some(Intercept::cancel(*v)))));
        {
            let calls = calls.clone();
            chain.push(interceptor(move |v| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Some(Intercept::pass(*v)))
            }));
        }

        let out = chain.run(3).unwrap();
        assert!(out.cancel);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn interceptor_error_propagates_with_hook() {
        let chain = Chain::new(Hook::BeforeUnregister);
        chain.push(interceptor(|_| Err(anyhow::anyhow!("misconfigured"))));

        let err = chain.run(0).unwrap_err();
        assert_eq!(err.hook(), Hook::BeforeUnregister);
    }

    #[test]
    fn observers_are_notified_in_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let observers: Observers<i32> = Observers::new(Hook::AfterRegister);
        for tag in ["a", "b"] {
            let seen = seen.clone();
            observers.push(Arc::new(move |v: &i32| -> anyhow::Result<()> {
                seen.lock().push(format!("{tag}{v}"));
                Ok(())
            }));
        }

        observers.notify(&1).unwrap();
        assert_eq!(*seen.lock(), vec!["a1".to_string(), "b1".to_string()]);
    }
}
