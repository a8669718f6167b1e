//! Task spawning for work started from the UI thread
//!
//! The native entry point enters the tokio runtime before the event loop starts,
//! so UI callbacks can spawn directly.

/// Spawn an async task on the ambient tokio runtime.
pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    #[cfg(feature = "profiling")]
    {
        tokio::spawn(async move {
            // Tag the task with its future type so traces can be filtered by kind
            profiling::scope!(
                "async_runtime::spawn",
                format!("task_type={}", std::any::type_name::<F>()).as_str()
            );
            future.await
        })
    }
    #[cfg(not(feature = "profiling"))]
    {
        tokio::spawn(future)
    }
}
