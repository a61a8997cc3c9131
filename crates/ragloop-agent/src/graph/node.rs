use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use ragloop_core::error::{RagError, Result};

use super::state::{RagState, StateUpdate};

/// A unit of work in the graph.
///
/// `execute` may fail; `fallback` may not. When `execute` errors or runs past
/// the node timeout, the executor merges `fallback` instead.
pub trait Node: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn execute<'a>(
        &'a self,
        state: &'a RagState,
        ctx: &'a NodeContext,
    ) -> BoxFuture<'a, Result<StateUpdate>>;

    fn fallback(&self, state: &RagState, error: &RagError) -> StateUpdate;
}

/// Per-run context handed to every node.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub run_id: String,
    pub cancel: CancellationToken,
    /// Bound for each external call a node makes.
    pub call_timeout: Duration,
}

impl NodeContext {
    pub fn new(run_id: impl Into<String>, cancel: CancellationToken, call_timeout: Duration) -> Self {
        Self {
            run_id: run_id.into(),
            cancel,
            call_timeout,
        }
    }

    /// Await an external call under the per-call timeout.
    pub async fn call<T, F>(&self, call: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RagError::CallTimeout {
                call: call.to_string(),
                timeout_secs: self.call_timeout.as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_call_times_out() {
        let ctx = NodeContext::new("r", CancellationToken::new(), Duration::from_secs(30));
        let result: Result<()> = ctx
            .call("slow", async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        match result {
            Err(RagError::CallTimeout { call, timeout_secs }) => {
                assert_eq!(call, "slow");
                assert_eq!(timeout_secs, 30);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_passes_result_through() {
        let ctx = NodeContext::new("r", CancellationToken::new(), Duration::from_secs(1));
        let value = ctx.call("fast", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
