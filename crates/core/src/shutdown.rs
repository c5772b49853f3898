use std::time::Duration;
use tokio::sync::watch;

/// Sending half, owned by whoever decides to stop the run (Ctrl-C handler).
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Cancellation signal passed into every fetch.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleeps for `d`. Returns `false` if the signal fired first.
    pub async fn sleep(&self, d: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }

        let mut rx = self.rx.clone();
        let fired = async move {
            if rx.wait_for(|stop| *stop).await.is_err() {
                // Sender gone: nobody can cancel anymore.
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(d) => true,
            _ = fired => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_completes_without_signal() {
        assert!(Shutdown::never().sleep(Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn trigger_interrupts_sleep() {
        let (handle, shutdown) = channel();
        let waiter = tokio::spawn(async move { shutdown.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.trigger();
        assert!(!waiter.await.unwrap());
    }

    #[test]
    fn subscribers_observe_trigger() {
        let (handle, shutdown) = channel();
        let other = handle.subscribe();
        assert!(!shutdown.is_triggered());
        handle.trigger();
        assert!(shutdown.is_triggered());
        assert!(other.is_triggered());
    }
}
