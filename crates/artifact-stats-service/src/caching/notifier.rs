use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;

use super::{CacheError, CacheKey};

/// A value transition of one cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<T> {
    pub key: CacheKey,
    pub new_value: T,
    pub old_value: T,
}

/// Something interested in value transitions.
pub trait ChangeListener<T>: Send + Sync {
    /// A short name used when logging failures.
    fn name(&self) -> &str;

    fn on_change(&self, change: Change<T>) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Dispatches changes to the registered listeners.
///
/// Every listener runs as its own task. A listener that fails or panics is logged and does
/// not affect the other listeners, nor the caller of [`notify`](Self::notify).
pub struct ChangeNotifier<T> {
    listeners: Arc<RwLock<Vec<Arc<dyn ChangeListener<T>>>>>,
}

impl<T> Clone for ChangeNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Default for ChangeNotifier<T> {
    fn default() -> Self {
        Self {
            listeners: Default::default(),
        }
    }
}

impl<T> fmt::Debug for ChangeNotifier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl<T> ChangeNotifier<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener<T>>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Fires and forgets one task per listener.
    pub fn notify(&self, key: &CacheKey, new_value: &T, old_value: &T) {
        let listeners = self.listeners.read().clone();

        for listener in listeners {
            let change = Change {
                key: key.clone(),
                new_value: new_value.clone(),
                old_value: old_value.clone(),
            };
            tokio::spawn(async move {
                let key = change.key.clone();
                let outcome = AssertUnwindSafe(listener.on_change(change))
                    .catch_unwind()
                    .await;

                let error = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(err)) => CacheError::ListenerNotificationFailed(format!("{err:#}")),
                    Err(_panic) => {
                        CacheError::ListenerNotificationFailed("listener panicked".into())
                    }
                };
                metric!(counter("caches.listener.failed") += 1, "cache" => key.kind().as_ref());
                tracing::error!(
                    error = &error as &dyn std::error::Error,
                    listener = listener.name(),
                    key = %key,
                    "Change listener failed"
                );
            });
        }
    }
}

/// Logs every change it hears about.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl<T: fmt::Debug + Send + 'static> ChangeListener<T> for LoggingListener {
    fn name(&self) -> &str {
        "logging"
    }

    fn on_change(&self, change: Change<T>) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            tracing::info!(
                key = %change.key,
                old = ?change.old_value,
                new = ?change.new_value,
                "Cached value changed"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    struct Recorder(mpsc::UnboundedSender<Change<u64>>);

    impl ChangeListener<u64> for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_change(&self, change: Change<u64>) -> BoxFuture<'static, anyhow::Result<()>> {
            let sender = self.0.clone();
            Box::pin(async move {
                sender.send(change)?;
                Ok::<_, anyhow::Error>(())
            })
        }
    }

    async fn fail() -> anyhow::Result<()> {
        anyhow::bail!("nope")
    }

    async fn explode() -> anyhow::Result<()> {
        panic!("listener bug")
    }

    struct Failing;

    impl ChangeListener<u64> for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn on_change(&self, _change: Change<u64>) -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(fail())
        }
    }

    struct Panicking;

    impl ChangeListener<u64> for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        fn on_change(&self, _change: Change<u64>) -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(explode())
        }
    }

    #[tokio::test]
    async fn test_every_listener_is_called_despite_failures() {
        artifact_stats_test::setup();
        let notifier = ChangeNotifier::<u64>::default();
        let (sender, mut receiver) = mpsc::unbounded_channel();

        notifier.subscribe(Arc::new(Failing));
        notifier.subscribe(Arc::new(Recorder(sender.clone())));
        notifier.subscribe(Arc::new(Panicking));
        notifier.subscribe(Arc::new(Recorder(sender)));
        assert_eq!(notifier.listener_count(), 4);

        let key = CacheKey::for_testing("changed");
        notifier.notify(&key, &2, &1);

        let expected = Change {
            key,
            new_value: 2,
            old_value: 1,
        };
        for _ in 0..2 {
            let change = tokio::time::timeout(Duration::from_secs(5), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(change, expected);
        }
    }

    #[tokio::test]
    async fn test_notify_without_listeners() {
        let notifier = ChangeNotifier::<u64>::default();
        notifier.notify(&CacheKey::for_testing("nobody"), &2, &1);
    }
}
