//! Detachable push streams shared by the queue feed and the signaling relays.

use tokio::sync::mpsc;

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A stream of pushed values plus the hook that detaches it from its source.
///
/// Unsubscribing never fails: the hook runs at most once, either from
/// [`Subscription::unsubscribe`] or on drop, and it must tolerate a source
/// that has already gone away.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    release: Option<Release>,
}

impl<T> Subscription<T> {
    pub fn new(
        rx: mpsc::UnboundedReceiver<T>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// A subscription whose source cleans up on its own once the receiver drops.
    pub fn detached(rx: mpsc::UnboundedReceiver<T>) -> Self {
        Self { rx, release: None }
    }

    /// Next value, or `None` once the source has closed.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.rx.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.release.is_some())
            .finish()
    }
}
