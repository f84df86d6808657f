//! 分层事件分发引擎（tierbus）
//!
//! 在进程内按数值事件类型注册处理器，并按优先级分层发布事件：
//! - 事件模型与类型提取（`event`）：事件可同时属于多个类型；
//! - 处理器记录与构建器（`handler`）：构建后不可变；
//! - 注册索引（`registry`）：priority → type → 处理器集合；
//! - 中间件链（`middleware`）：八个挂载点，可观察或否决注册、注销与发布的各阶段；
//! - 引擎（`engine`）：同层并发、跨层严格降序，支持超时与阻断。
//!
//! 典型用法：
//! 1. 用 `#[derive(Event)]` 与 `#[event(types = [..])]` 定义事件；
//! 2. 通过 `Handler::on_class::<E>()` 等入口构建处理器并 `register`；
//! 3. 按需挂载中间件，随后 `publish`。
//!
mod registry;

pub mod engine;
pub mod error;
pub mod event;
pub mod handler;
pub mod middleware;

pub use engine::{EventEngine, EventEngineConfig, Subscription};
pub use error::{EngineError, EngineResult, Hook};
pub use event::{Event, EventClass, EventDescriptor, EventRef, EventTypeId, EventTypes};
pub use handler::{Handler, HandlerId, HandlerRef};
pub use middleware::{Intercept, PublishReport, TierCheck};
pub use tierbus_macros::Event;

// 允许在本 crate 内部通过 ::tierbus 进行自引用，
// 以便派生宏在本 crate 的单元测试中也能解析到 ::tierbus 路径。
extern crate self as tierbus;
