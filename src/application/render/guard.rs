//! Re-entrancy guard for random node hydration.
//!
//! A node's own template may ask for random nodes of the same kind. While a
//! batch of nodes is rendered the current task is marked, and nested requests
//! resolve to empty output instead of recursing. The flag is task-local, so
//! concurrent requests never see each other's marker.

use std::future::Future;

tokio::task_local! {
    static SUB_RENDERING: bool;
}

/// True while the current task is rendering random nodes.
pub fn is_sub_rendering() -> bool {
    SUB_RENDERING.try_with(|flag| *flag).unwrap_or(false)
}

/// Runs `f` with the sub-rendering marker raised.
pub async fn sub_rendering<F>(f: F) -> F::Output
where
    F: Future,
{
    SUB_RENDERING.scope(true, f).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flag_is_raised_only_inside_scope() {
        assert!(!is_sub_rendering());
        let inside = sub_rendering(async { is_sub_rendering() }).await;
        assert!(inside);
        assert!(!is_sub_rendering());
    }

    #[tokio::test]
    async fn nested_awaits_observe_flag() {
        async fn nested() -> bool {
            tokio::task::yield_now().await;
            is_sub_rendering()
        }

        assert!(sub_rendering(nested()).await);
    }

    #[tokio::test]
    async fn spawned_tasks_do_not_inherit_flag() {
        let spawned = sub_rendering(async { tokio::spawn(async { is_sub_rendering() }).await })
            .await
            .expect("task joins");
        assert!(!spawned);
    }
}
