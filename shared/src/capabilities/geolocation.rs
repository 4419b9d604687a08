use crux_core::capability::{CapabilityContext, Operation};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    Unavailable(String),

    #[error("location request timed out")]
    Timeout,

    #[error("geolocation not supported on this device")]
    Unsupported,
}

pub type GeolocationResult = Result<GeoFix, GeolocationError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum GeolocationOperation {
    Watch { high_accuracy: bool },
    ClearWatch,
    Current { high_accuracy: bool },
}

impl Operation for GeolocationOperation {
    type Output = GeolocationResult;
}

#[derive(crux_core::macros::Capability)]
pub struct Geolocation<Ev> {
    context: CapabilityContext<GeolocationOperation, Ev>,
}

impl<Ev> Geolocation<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<GeolocationOperation, Ev>) -> Self {
        Self { context }
    }

    /// Continuous high-accuracy fixes until `clear_watch`.
    pub fn watch<F>(&self, make_event: F)
    where
        F: Fn(GeolocationResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let mut fixes =
                ctx.stream_from_shell(GeolocationOperation::Watch { high_accuracy: true });
            while let Some(fix) = fixes.next().await {
                ctx.update_app(make_event(fix));
            }
        });
    }

    pub fn clear_watch(&self) {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            ctx.notify_shell(GeolocationOperation::ClearWatch).await;
        });
    }

    pub fn current<F>(&self, make_event: F)
    where
        F: FnOnce(GeolocationResult) -> Ev + Send + 'static,
    {
        let ctx = self.context.clone();
        self.context.spawn(async move {
            let fix = ctx
                .request_from_shell(GeolocationOperation::Current { high_accuracy: false })
                .await;
            ctx.update_app(make_event(fix));
        });
    }
}
