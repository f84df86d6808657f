/// 分层分发示例
/// 展示 派生事件 -> 构建处理器 -> 挂载中间件 -> 发布 的完整流程，
/// 以及阻断、超时与审计中间件的效果。可通过 RUST_LOG=tierbus=trace 观察引擎日志。
use anyhow::Result as AnyResult;
use std::sync::Arc;
use std::time::Duration;
use tierbus::{Event, EventEngine, EventEngineConfig, EventRef, Handler, Intercept};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[repr(i64)]
#[derive(Clone, Copy)]
enum Topic {
    Message = 1,
    Order = 2,
    Refund = 3,
}

#[derive(Event, Debug)]
#[event(types = [Topic::Message, Topic::Order])]
struct OrderPlaced {
    order_id: u64,
    amount: u64,
}

#[derive(Event, Debug)]
#[event(types = [Topic::Message, Topic::Refund])]
struct RefundRequested {
    order_id: u64,
}

// ============================================================================
// 处理器
// ============================================================================

fn fraud_gate() -> tierbus::HandlerRef {
    // 金额过大时阻断后续所有层
    Handler::on_class::<OrderPlaced>()
        .name("fraud-gate")
        .priority(100)
        .block(true)
        .handle(|event: EventRef| async move {
            let Some(order) = event.downcast_ref::<OrderPlaced>() else {
                return Ok(false);
            };
            if order.amount > 10_000 {
                tracing::info!(order_id = order.order_id, "order held for review");
                return Ok(true);
            }
            Ok(false)
        })
}

fn slow_ledger() -> tierbus::HandlerRef {
    Handler::on_class::<OrderPlaced>()
        .name("ledger")
        .priority(10)
        .timeout_ms(50)
        .handle(|_| async {
            tokio::time::sleep(Duration::from_millis(120)).await;
            tracing::info!("ledger finished after its deadline");
            Ok(true)
        })
}

fn notifier() -> tierbus::HandlerRef {
    Handler::on_types([Topic::Message as i64])
        .name("notifier")
        .handle(|event: EventRef| async move {
            if let Some(order) = event.downcast_ref::<OrderPlaced>() {
                tracing::info!(order_id = order.order_id, "notify: order placed");
            } else if let Some(refund) = event.downcast_ref::<RefundRequested>() {
                tracing::info!(order_id = refund.order_id, "notify: refund requested");
            }
            Ok(true)
        })
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tierbus=debug,priority_dispatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true).compact())
        .init();

    let engine = EventEngine::with_config(EventEngineConfig {
        name: "orders".to_string(),
        slow_tier_threshold: Some(Duration::from_millis(20)),
    });

    engine
        .use_after_register(|h| {
            tracing::info!(handler = %h.label(), "audit: registered");
            Ok(())
        })
        .use_before_publish(|event| {
            // 原样放行；返回 Intercept::cancel 可整体否决本次发布
            Ok(Some(Intercept::pass(Arc::clone(event))))
        })
        .use_after_publish(|report| {
            let names: Vec<String> = report.executed.iter().map(|h| h.label()).collect();
            tracing::info!(executed = ?names, "audit: publish finished");
            Ok(())
        });

    engine.register(fraud_gate())?;
    engine.register(slow_ledger())?;
    let notifier = engine.register(notifier())?;

    engine
        .publish(OrderPlaced {
            order_id: 1,
            amount: 250,
        })
        .await?;
    engine
        .publish(OrderPlaced {
            order_id: 2,
            amount: 50_000,
        })
        .await?;
    engine.publish(RefundRequested { order_id: 1 }).await?;

    notifier.cancel()?;
    tracing::info!(priorities = ?engine.priorities(), "notifier removed");

    // 等待超时的 ledger 在后台完成
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
