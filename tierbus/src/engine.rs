//! 事件引擎（EventEngine）
//!
//! 按优先级分层分发事件：
//! - `register`/`unregister` 维护注册索引，前后各有中间件挂载点；
//! - `publish` 按 priority 降序逐层执行，同层处理器并发运行，
//!   支持单处理器超时、阻断（block）与中间件否决；
//! - 处理器的失败、panic 与超时只会被记为 `false`，不会传播给调用方。
//!
//! 同层处理器通过 `tokio::spawn` 启动，超时只丢弃结果而不会中止任务，
//! 因此 `publish` 必须在 tokio 运行时中调用。
//!
use crate::error::EngineResult;
use crate::event::{Event, EventRef};
use crate::handler::HandlerRef;
use crate::middleware::{Intercept, Middleware, PublishReport, TierCheck};
use crate::registry::RegistrationIndex;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// 引擎配置
#[derive(Clone, Debug)]
pub struct EventEngineConfig {
    /// 日志中的引擎名称
    pub name: String,
    /// 单层耗时超过该阈值时输出告警
    pub slow_tier_threshold: Option<Duration>,
}

impl Default for EventEngineConfig {
    fn default() -> Self {
        Self {
            name: "tierbus".to_string(),
            slow_tier_threshold: None,
        }
    }
}

struct EngineInner {
    index: RwLock<RegistrationIndex>,
    middleware: Middleware,
    config: EventEngineConfig,
}

/// 引擎句柄，克隆后共享同一份注册索引与中间件
#[derive(Clone)]
pub struct EventEngine {
    inner: Arc<EngineInner>,
}

impl Default for EventEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEngine {
    pub fn new() -> Self {
        Self::with_config(EventEngineConfig::default())
    }

    pub fn with_config(config: EventEngineConfig) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                index: RwLock::new(RegistrationIndex::default()),
                middleware: Middleware::default(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &EventEngineConfig {
        &self.inner.config
    }

    /// 注册处理器，返回可重复调用的取消句柄
    pub fn register(&self, handler: HandlerRef) -> EngineResult<Subscription> {
        let mw = &self.inner.middleware;
        let step = mw.before_register.run(handler.clone())?;
        if step.cancel {
            debug!(engine = %self.inner.config.name, handler = %handler.label(), "register cancelled by middleware");
            return Ok(Subscription::noop());
        }

        let effective = step.payload;
        let added = self.inner.index.write().insert(&effective);
        debug!(
            engine = %self.inner.config.name,
            handler = %effective.label(),
            priority = effective.priority(),
            targets = ?effective.targets(),
            added,
            "handler registered"
        );

        mw.after_register.notify(&effective)?;

        Ok(Subscription {
            engine: Arc::downgrade(&self.inner),
            handler: Some(handler),
        })
    }

    /// 注销处理器；未注册或重复注销均为空操作
    pub fn unregister(&self, handler: &HandlerRef) -> EngineResult<()> {
        let mw = &self.inner.middleware;
        let step = mw.before_unregister.run(handler.clone())?;
        if step.cancel {
            debug!(engine = %self.inner.config.name, handler = %handler.label(), "unregister cancelled by middleware");
            return Ok(());
        }

        let effective = step.payload;
        let removed = self.inner.index.write().remove(&effective);
        let Some(removed) = removed else {
            // priority 不在索引中：静默返回，不通知观察者
            trace!(engine = %self.inner.config.name, handler = %effective.label(), "unregister skipped, priority not indexed");
            return Ok(());
        };
        debug!(
            engine = %self.inner.config.name,
            handler = %effective.label(),
            removed,
            "handler unregistered"
        );

        mw.after_unregister.notify(&effective)
    }

    /// 发布事件
    pub async fn publish<E: Event>(&self, event: E) -> EngineResult<()> {
        self.publish_shared(Arc::new(event)).await
    }

    /// 发布已共享的事件；仅中间件故障会返回错误
    pub async fn publish_shared(&self, event: EventRef) -> EngineResult<()> {
        let mw = &self.inner.middleware;
        let step = mw.before_publish.run(event)?;
        if step.cancel {
            // 被整体否决的发布对观察者同样不可见
            debug!(engine = %self.inner.config.name, "publish cancelled by middleware");
            return Ok(());
        }

        let event = step.payload;
        let types = event.event_types();
        let priorities = self.inner.index.read().priorities();

        let mut executed: Vec<HandlerRef> = Vec::new();
        let mut stale: Vec<i64> = Vec::new();
        let outcome = self
            .run_tiers(&event, &types, &priorities, &mut executed, &mut stale)
            .await;

        let report = PublishReport { event, executed };
        let observed = mw.after_publish.notify(&report);

        if !stale.is_empty() {
            trace!(engine = %self.inner.config.name, stale = ?stale, "pruning stale priorities");
            self.inner.index.write().prune(&stale);
        }

        outcome.and(observed)
    }

    async fn run_tiers(
        &self,
        event: &EventRef,
        types: &[i64],
        priorities: &[i64],
        executed: &mut Vec<HandlerRef>,
        stale: &mut Vec<i64>,
    ) -> EngineResult<()> {
        let mw = &self.inner.middleware;

        for &priority in priorities {
            let collected = self.inner.index.read().collect(priority, types);
            let Some(bag) = collected else {
                stale.push(priority);
                continue;
            };

            let check = mw
                .before_priority_check
                .run(TierCheck { priority, handlers: bag })?;
            if check.cancel {
                trace!(engine = %self.inner.config.name, priority, "tier skipped by middleware");
                continue;
            }

            let handlers = check.payload.handlers;
            if handlers.is_empty() {
                continue;
            }

            trace!(engine = %self.inner.config.name, priority, handlers = handlers.len(), "executing tier");
            let results = self.execute_tier(priority, event, &handlers).await;

            let mut blocked = false;
            for (handler, ok) in handlers.iter().zip(results) {
                if !ok {
                    continue;
                }
                executed.push(handler.clone());

                if handler.block() {
                    let decision = mw.before_block_check.run(handler.clone())?;
                    if decision.cancel {
                        continue;
                    }
                    debug!(
                        engine = %self.inner.config.name,
                        handler = %handler.label(),
                        priority,
                        "lower tiers blocked"
                    );
                    blocked = true;
                    break;
                }
            }

            if blocked {
                break;
            }
        }

        Ok(())
    }

    /// 启动同层全部处理器后统一等待
    async fn execute_tier(&self, priority: i64, event: &EventRef, handlers: &[HandlerRef]) -> Vec<bool> {
        let started = Instant::now();

        let runs: Vec<_> = handlers
            .iter()
            .map(|handler| {
                let task = tokio::spawn(invoke(handler.clone(), event.clone()));
                settle(handler.clone(), task)
            })
            .collect();
        let results = join_all(runs).await;

        if let Some(threshold) = self.inner.config.slow_tier_threshold {
            let elapsed = started.elapsed();
            if elapsed > threshold {
                warn!(
                    engine = %self.inner.config.name,
                    priority,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow tier"
                );
            }
        }

        results
    }

    /// 当前存活的 priority（降序）
    pub fn priorities(&self) -> Vec<i64> {
        self.inner.index.read().priorities()
    }

    pub fn is_registered(&self, handler: &HandlerRef) -> bool {
        self.inner.index.read().contains(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.inner.index.read().handler_count()
    }
}

// 中间件注册：按调用顺序追加，返回 &Self 以便链式配置
impl EventEngine {
    pub fn use_before_register<F>(&self, f: F) -> &Self
    where
        F: Fn(&HandlerRef) -> anyhow::Result<Option<Intercept<HandlerRef>>> + Send + Sync + 'static,
    {
        self.inner.middleware.before_register.push(Arc::new(f));
        self
    }

    pub fn use_after_register<F>(&self, f: F) -> &Self
    where
        F: Fn(&HandlerRef) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.middleware.after_register.push(Arc::new(f));
        self
    }

    pub fn use_before_unregister<F>(&self, f: F) -> &Self
    where
        F: Fn(&HandlerRef) -> anyhow::Result<Option<Intercept<HandlerRef>>> + Send + Sync + 'static,
    {
        self.inner.middleware.before_unregister.push(Arc::new(f));
        self
    }

    pub fn use_after_unregister<F>(&self, f: F) -> &Self
    where
        F: Fn(&HandlerRef) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.middleware.after_unregister.push(Arc::new(f));
        self
    }

    pub fn use_before_publish<F>(&self, f: F) -> &Self
    where
        F: Fn(&EventRef) -> anyhow::Result<Option<Intercept<EventRef>>> + Send + Sync + 'static,
    {
        self.inner.middleware.before_publish.push(Arc::new(f));
        self
    }

    pub fn use_before_priority_check<F>(&self, f: F) -> &Self
    where
        F: Fn(&TierCheck) -> anyhow::Result<Option<Intercept<TierCheck>>> + Send + Sync + 'static,
    {
        self.inner.middleware.before_priority_check.push(Arc::new(f));
        self
    }

    pub fn use_before_block_check<F>(&self, f: F) -> &Self
    where
        F: Fn(&HandlerRef) -> anyhow::Result<Option<Intercept<HandlerRef>>> + Send + Sync + 'static,
    {
        self.inner.middleware.before_block_check.push(Arc::new(f));
        self
    }

    pub fn use_after_publish<F>(&self, f: F) -> &Self
    where
        F: Fn(&PublishReport) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.middleware.after_publish.push(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for EventEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEngine")
            .field("config", &self.inner.config)
            .field("priorities", &self.priorities())
            .finish_non_exhaustive()
    }
}

async fn invoke(handler: HandlerRef, event: EventRef) -> bool {
    match handler.invoke(event).await {
        Ok(ok) => ok,
        Err(err) => {
            warn!(handler = %handler.label(), error = %err, "handler failed");
            false
        }
    }
}

/// 等待处理器结果；超时只丢弃句柄（任务继续在后台运行）
async fn settle(handler: HandlerRef, task: JoinHandle<bool>) -> bool {
    let joined = match handler.timeout() {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(handler = %handler.label(), timeout_ms = limit.as_millis() as u64, "handler timed out");
                return false;
            }
        },
        None => task.await,
    };

    match joined {
        Ok(ok) => ok,
        Err(err) => {
            warn!(handler = %handler.label(), error = %err, "handler panicked");
            false
        }
    }
}

/// 注册返回的取消句柄；`cancel` 可安全地重复调用
pub struct Subscription {
    engine: Weak<EngineInner>,
    handler: Option<HandlerRef>,
}

impl Subscription {
    fn noop() -> Self {
        Self {
            engine: Weak::new(),
            handler: None,
        }
    }

    /// 注销注册时传入的原始处理器
    pub fn cancel(&self) -> EngineResult<()> {
        let Some(handler) = &self.handler else {
            return Ok(());
        };
        let Some(inner) = self.engine.upgrade() else {
            return Ok(());
        };
        EventEngine { inner }.unregister(handler)
    }

    /// 注册是否被中间件否决
    pub fn is_noop(&self) -> bool {
        self.handler.is_none()
    }

    pub fn handler(&self) -> Option<&HandlerRef> {
        self.handler.as_ref()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handler", &self.handler.as_ref().map(|h| h.id()))
            .finish()
    }
}
