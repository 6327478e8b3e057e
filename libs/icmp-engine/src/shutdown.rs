use tokio::sync::broadcast;

/// listens for the engine-wide shutdown signal; `recv` resolves once and
/// then latches, so a `select!` loop can poll it repeatedly without
/// re-subscribing.
pub(crate) struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub(crate) fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            is_shutdown: false,
            notify,
        }
    }

    pub(crate) async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }
        // either branch means the sender was dropped or fired: both mean shutdown
        let _ = self.notify.recv().await;
        self.is_shutdown = true;
    }
}
