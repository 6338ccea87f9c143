//! Execution wrapper for externally supplied callback code.
//!
//! Every extension-authored callback — event handlers, lifecycle callbacks,
//! namespace methods — runs through [`execute`]. The wrapper awaits the
//! callback (so rejected futures and returned errors funnel into the same
//! path), catches panics, logs one structured report, and hands the failure
//! back to the immediate caller as an [`ExecutionError`]. The caller decides
//! what to do with it; the wrapper never swallows a failure and never reports
//! it twice.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::error;

/// Where a callback is being invoked from.
///
/// The scope is a human-readable label such as
/// `extension \`grid\` on handler for \`widget:click:*\``; the brick fields are
/// filled in when the call site belongs to a specific entity.
#[derive(Debug, Clone, Default)]
pub struct CallSite {
    /// Label describing the callback being invoked.
    pub scope: String,
    /// Owning entity id, when known.
    pub brick_id: Option<String>,
    /// Owning entity classification (`host::kind`), when known.
    pub classification: Option<String>,
}

impl CallSite {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            brick_id: None,
            classification: None,
        }
    }

    pub fn with_brick(
        mut self,
        id: impl Into<String>,
        classification: impl Into<String>,
    ) -> Self {
        self.brick_id = Some(id.into());
        self.classification = Some(classification.into());
        self
    }
}

/// Structured record of a failed callback.
#[derive(Debug, Clone, thiserror::Error)]
#[error("callback failed in {scope}: {message}")]
pub struct ExecutionError {
    /// Call-site label, as supplied by the dispatcher.
    pub scope: String,
    /// Rendered error chain or panic message.
    pub message: String,
    /// Owning entity id, when the call site had one.
    pub brick_id: Option<String>,
    /// Owning entity classification, when the call site had one.
    pub classification: Option<String>,
    /// Capture time, unix millis.
    pub captured_at: i64,
}

impl ExecutionError {
    fn capture(message: String, site: &CallSite) -> Self {
        Self {
            scope: site.scope.clone(),
            message,
            brick_id: site.brick_id.clone(),
            classification: site.classification.clone(),
            captured_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Invoke one callback future and convert any failure into a structured,
/// logged [`ExecutionError`].
///
/// Panics are the Rust analog of an uncaught throw; they are captured with
/// `catch_unwind` rather than being allowed to tear down the dispatcher.
pub async fn execute<T, F>(fut: F, site: &CallSite) -> Result<T, ExecutionError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            let captured = ExecutionError::capture(format!("{err:#}"), site);
            report(&captured);
            Err(captured)
        }
        Err(panic) => {
            let captured = ExecutionError::capture(panic_message(panic), site);
            report(&captured);
            Err(captured)
        }
    }
}

fn report(err: &ExecutionError) {
    error!(
        scope = %err.scope,
        brick_id = ?err.brick_id,
        classification = ?err.classification,
        error = %err.message,
        "callback execution failed"
    );
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
