//! The analytical execution engine boundary (§6): a pure async function from
//! `(execution context, principal name, SQL text)` to columns and rows.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::pgguard::error::Result;

/// Cancellable execution context derived from the connection's context (§4.5 step 1) and
/// threaded through to the executor so a `CancelRequest` can interrupt in-flight work.
#[derive(Clone, Debug)]
pub struct ExecContext {
    cancel: CancellationToken,
}

impl ExecContext {
    pub fn new() -> Self {
        ExecContext { cancel: CancellationToken::new() }
    }

    pub fn child(&self) -> Self {
        ExecContext { cancel: self.cancel.child_token() }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn handle(&self) -> CancelHandle {
        CancelHandle { cancel: self.cancel.clone() }
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The value stored in the server-wide `backend_key -> cancel_handle` map (§5). Invoking
/// it is the only thing a cancel dispatcher may do with it.
#[derive(Clone)]
pub struct CancelHandle {
    cancel: CancellationToken,
}

impl CancelHandle {
    pub fn fire(&self) {
        self.cancel.cancel();
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecutedQuery {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &ExecContext,
        principal: &str,
        sql: &str,
    ) -> Result<ExecutedQuery>;
}
