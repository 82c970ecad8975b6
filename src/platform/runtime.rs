use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};

static BACKGROUND_RUNTIME: LazyLock<Runtime> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("firestore-realtime")
        .enable_all()
        .build()
        .expect("failed to build background tokio runtime")
});

/// Spawns `future` on the ambient tokio runtime, or on a lazily created background
/// runtime when called outside of one.
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    } else {
        BACKGROUND_RUNTIME.spawn(future);
    }
}

/// Waits for `duration`; returns immediately for a zero duration.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    tokio::time::sleep(duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn spawns_outside_a_runtime() {
        let (tx, rx) = std::sync::mpsc::channel();
        spawn_detached(async move {
            let _ = tx.send(7);
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(7));
    }

    #[tokio::test]
    async fn spawns_on_current_runtime() {
        let flag = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&flag);
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawn_detached(async move {
            observed.store(true, Ordering::SeqCst);
            let _ = tx.send(());
        });
        rx.await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
