//! One-shot broadcast notification, used as the gateway's shutdown channel.

use std::sync::Arc;

use tokio::sync::Semaphore;

/// Synchronization utility which sends a notification to all consumers
/// *once*, most commonly used for shutdown signals.
///
/// - Multi-producer and multi-consumer: clone to get another handle.
/// - Every clone observes the signal at most once; new clones made after the
///   signal can still observe it.
/// - It is safe to send the signal multiple times.
///
/// The implementation uses the fact that [`Semaphore::acquire`] on a
/// semaphore with zero permits only returns once the semaphore has been
/// closed: closing is sending, an `AcquireError` is receiving.
#[derive(Debug)]
pub struct NotifyOnce {
    inner: Arc<Semaphore>,
    have_recved: bool,
}

impl NotifyOnce {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Semaphore::new(0)),
            have_recved: false,
        }
    }

    /// Send the signal, completing every pending and future call to
    /// [`recv`](Self::recv).
    pub fn send(&self) {
        self.inner.close();
    }

    /// Wait for the signal.
    ///
    /// NOTE: if this handle has already observed the signal, this future
    /// never resolves; take a fresh clone per waiter.
    pub async fn recv(&mut self) {
        if self.have_recved {
            std::future::pending().await
        } else {
            self.inner
                .acquire()
                .await
                .map_err(|_| ())
                .expect_err("Shouldn't've been able to acquire a permit");
            self.have_recved = true;
        }
    }

    /// Waits for the signal, taking ownership of the handle. Useful for
    /// graceful shutdown APIs requiring `impl Future<Output = ()> + 'static`.
    pub async fn recv_owned(mut self) {
        self.recv().await
    }

    /// Whether the signal has been sent; does not consume the signal.
    #[must_use]
    pub fn try_recv(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Clone for NotifyOnce {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            // Every clone gets a chance to see the signal.
            have_recved: false,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time;
    use tokio_test::{assert_pending, assert_ready};

    use super::*;

    #[test]
    fn multiple_sends_dont_panic() {
        let shutdown = NotifyOnce::new();
        shutdown.send();
        shutdown.send();
    }

    #[test]
    fn yields_at_most_once_per_handle() {
        let shutdown1 = NotifyOnce::new();
        let mut shutdown2 = shutdown1.clone();

        let mut recv1 = tokio_test::task::spawn(shutdown2.recv());
        assert_pending!(recv1.poll());
        shutdown1.send();
        assert!(recv1.is_woken());
        assert_ready!(recv1.poll());
        drop(recv1);

        // Same handle never yields again.
        let mut recv2 = tokio_test::task::spawn(shutdown2.recv());
        assert_pending!(recv2.poll());
        drop(recv2);

        // A fresh clone sees the signal immediately.
        let mut shutdown3 = shutdown2.clone();
        let mut recv3 = tokio_test::task::spawn(shutdown3.recv());
        assert_ready!(recv3.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_after_send_is_ok() {
        let shutdown1 = NotifyOnce::new();
        let shutdown2 = shutdown1.clone();
        time::sleep(Duration::from_secs(1)).await;
        shutdown1.send();
        assert!(shutdown2.try_recv());
        time::timeout(Duration::from_nanos(1), shutdown2.recv_owned())
            .await
            .expect("Should finish immediately");
    }
}
