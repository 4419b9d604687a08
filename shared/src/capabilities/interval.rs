use crux_core::capability::{CapabilityContext, Operation};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalOperation {
    Start { name: String, period_ms: u64 },
    Cancel { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalTick {
    pub at_ms: u64,
}

impl Operation for IntervalOperation {
    type Output = IntervalTick;
}

/// Named repeating timers owned by the shell.
#[derive(crux_core::macros::Capability)]
pub struct Interval<Ev> {
    context: CapabilityContext<IntervalOperation, Ev>,
}

impl<Ev> Interval<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<IntervalOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn start<F>(&self, name: impl Into<String>, period_ms: u64, make_event: F)
    where
        F: Fn(IntervalTick) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        let name = name.into();
        self.context.spawn(async move {
            let mut ticks = ctx.stream_from_shell(IntervalOperation::Start { name, period_ms });
            while let Some(tick) = ticks.next().await {
                ctx.update_app(make_event(tick));
            }
        });
    }

    pub fn cancel(&self, name: impl Into<String>) {
        let ctx = self.context.clone();
        let name = name.into();
        self.context.spawn(async move {
            ctx.notify_shell(IntervalOperation::Cancel { name }).await;
        });
    }
}
