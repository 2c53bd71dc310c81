//! One-shot broadcast used to shut down long-running tasks.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};
use tokio::sync::watch;

/// Signals every [Noticer] created from it, once.
#[derive(Clone, Debug)]
pub struct Notifier {
    sender: Arc<watch::Sender<bool>>,
}

impl Notifier {
    /// Create a new, unsignaled, notifier.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender: Arc::new(sender) }
    }

    /// Create a future that resolves once [Self::notify] is called.
    pub fn subscribe(&self) -> Noticer {
        let mut rx = self.sender.subscribe();
        Noticer {
            future: Box::pin(async move {
                // a dropped sender counts as a notification
                let _ = rx.wait_for(|noticed| *noticed).await;
            }),
            done: false,
        }
    }

    /// Wake all subscribers. Calling more than once has no further effect.
    pub fn notify(&self) {
        self.sender.send_replace(true);
    }

    /// True once [Self::notify] was called.
    pub fn noticed(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [Notifier::subscribe].
///
/// Can be polled again after it resolved, which makes it safe to use by
/// `&mut` inside a `select!` loop.
pub struct Noticer {
    future: Pin<Box<dyn Future<Output = ()> + Send>>,
    done: bool,
}

impl fmt::Debug for Noticer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Noticer").field("done", &self.done).finish()
    }
}

impl Future for Noticer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.done {
            return Poll::Ready(());
        }
        match self.future.as_mut().poll(cx) {
            Poll::Ready(()) => {
                self.done = true;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Notifier;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_notify_wakes_all() -> eyre::Result<()> {
        let notifier = Notifier::new();
        let a = notifier.subscribe();
        let mut b = notifier.subscribe();
        assert!(!notifier.noticed());

        let waiter = tokio::spawn(a);
        notifier.notify();
        timeout(Duration::from_secs(1), waiter).await??;
        timeout(Duration::from_secs(1), &mut b).await?;
        // resolved noticer stays resolved
        timeout(Duration::from_secs(1), &mut b).await?;

        // subscribing after the fact resolves immediately
        timeout(Duration::from_secs(1), notifier.subscribe()).await?;
        assert!(notifier.noticed());
        Ok(())
    }
}
