//! 引擎统一错误定义
//!
//! 处理器自身的失败（返回错误、panic、超时）在发布流水线内部被归一化为 `false`，
//! 不会出现在这里；此处仅包含应当暴露给调用方的故障，目前即中间件故障。
//!
use std::fmt;
use thiserror::Error;

/// 中间件挂载点
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hook {
    BeforeRegister,
    AfterRegister,
    BeforeUnregister,
    AfterUnregister,
    BeforePublish,
    BeforePriorityCheck,
    BeforeBlockCheck,
    AfterPublish,
}

impl Hook {
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::BeforeRegister => "before_register",
            Hook::AfterRegister => "after_register",
            Hook::BeforeUnregister => "before_unregister",
            Hook::AfterUnregister => "after_unregister",
            Hook::BeforePublish => "before_publish",
            Hook::BeforePriorityCheck => "before_priority_check",
            Hook::BeforeBlockCheck => "before_block_check",
            Hook::AfterPublish => "after_publish",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// 中间件抛出的错误原样向上传播（视为配置错误，不做吞没）
    #[error("middleware error: hook={hook}, reason={source}")]
    Middleware {
        hook: Hook,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    pub fn middleware(hook: Hook, source: anyhow::Error) -> Self {
        EngineError::Middleware { hook, source }
    }

    /// 出错的挂载点
    pub fn hook(&self) -> Hook {
        match self {
            EngineError::Middleware { hook, .. } => *hook,
        }
    }
}

/// 统一 Result 类型别名
pub type EngineResult<T> = Result<T, EngineError>;
