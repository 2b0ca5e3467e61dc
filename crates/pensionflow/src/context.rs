//! Per-request ambient context.
//!
//! The transport layer knows who the caller is; tools buried several layers
//! below need that identity without threading it through every signature.
//! [`RequestContext::scope`] brackets one request: inside the scoped future
//! the caller id and original query are readable from anywhere on the task,
//! and they vanish on every exit path because the task-local cell unwinds
//! with the scope. Concurrent requests on the same runtime are isolated -
//! each task sees only its own values.
//!
//! A process-global fallback slot exists for single-request harnesses that
//! cannot run inside a scope; it must be cleared explicitly.

use std::future::Future;

use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct RequestValues {
    user_id: i64,
    query: String,
}

tokio::task_local! {
    static REQUEST: RequestValues;
}

static FALLBACK: Mutex<Option<RequestValues>> = Mutex::new(None);

/// Ambient storage of the authenticated caller for the current request.
pub struct RequestContext;

impl RequestContext {
    /// Runs `fut` with `(user_id, query)` visible via the accessors below.
    ///
    /// The values are scoped to the future: once it resolves (or is dropped),
    /// they are gone. This is the `set`/`clear` bracket around a graph
    /// invocation.
    pub async fn scope<F>(user_id: i64, query: impl Into<String>, fut: F) -> F::Output
    where
        F: Future,
    {
        REQUEST
            .scope(
                RequestValues {
                    user_id,
                    query: query.into(),
                },
                fut,
            )
            .await
    }

    /// The caller id for the current request, if one is in scope.
    pub fn current_user_id() -> Option<i64> {
        REQUEST
            .try_with(|v| v.user_id)
            .ok()
            .or_else(|| FALLBACK.lock().as_ref().map(|v| v.user_id))
    }

    /// The original query for the current request, if one is in scope.
    pub fn current_query() -> Option<String> {
        REQUEST
            .try_with(|v| v.query.clone())
            .ok()
            .or_else(|| FALLBACK.lock().as_ref().map(|v| v.query.clone()))
    }

    /// Sets the process-global fallback slot. Only for harnesses that cannot
    /// wrap their work in [`RequestContext::scope`]; pair with
    /// [`RequestContext::clear_fallback`].
    pub fn set_fallback(user_id: i64, query: impl Into<String>) {
        *FALLBACK.lock() = Some(RequestValues {
            user_id,
            query: query.into(),
        });
    }

    /// Clears the process-global fallback slot.
    pub fn clear_fallback() {
        *FALLBACK.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests that observe the process-global fallback slot serialize on this
    // lock so parallel test threads cannot see each other's writes.
    static GLOBAL_SLOT: Mutex<()> = Mutex::new(());

    #[tokio::test]
    async fn values_visible_only_inside_scope() {
        let _guard = GLOBAL_SLOT.lock();
        assert_eq!(RequestContext::current_user_id(), None);

        RequestContext::scope(520, "how much will my pension be?", async {
            assert_eq!(RequestContext::current_user_id(), Some(520));
            assert_eq!(
                RequestContext::current_query().as_deref(),
                Some("how much will my pension be?")
            );
        })
        .await;

        assert_eq!(RequestContext::current_user_id(), None);
        assert_eq!(RequestContext::current_query(), None);
    }

    #[tokio::test]
    async fn cleared_on_error_exit() {
        let _guard = GLOBAL_SLOT.lock();
        let result: Result<(), &str> = RequestContext::scope(7, "q", async { Err("boom") }).await;
        assert!(result.is_err());
        assert_eq!(RequestContext::current_user_id(), None);
    }

    #[tokio::test]
    async fn concurrent_scopes_are_isolated() {
        let a = tokio::spawn(RequestContext::scope(1, "first", async {
            tokio::task::yield_now().await;
            RequestContext::current_user_id()
        }));
        let b = tokio::spawn(RequestContext::scope(2, "second", async {
            tokio::task::yield_now().await;
            RequestContext::current_user_id()
        }));

        assert_eq!(a.await.unwrap(), Some(1));
        assert_eq!(b.await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn nested_scope_shadows_outer() {
        RequestContext::scope(10, "outer", async {
            RequestContext::scope(20, "inner", async {
                assert_eq!(RequestContext::current_user_id(), Some(20));
            })
            .await;
            assert_eq!(RequestContext::current_user_id(), Some(10));
        })
        .await;
    }

    #[tokio::test]
    async fn fallback_slot_fills_gaps() {
        let _guard = GLOBAL_SLOT.lock();
        RequestContext::set_fallback(99, "fallback query");
        assert_eq!(RequestContext::current_user_id(), Some(99));

        // An active scope wins over the fallback.
        RequestContext::scope(1, "scoped", async {
            assert_eq!(RequestContext::current_user_id(), Some(1));
        })
        .await;

        RequestContext::clear_fallback();
        assert_eq!(RequestContext::current_user_id(), None);
    }
}
