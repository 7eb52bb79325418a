use tokio::task::JoinHandle;

/// Live-update listener. Dropping it, or calling
/// [`unsubscribe`](Subscription::unsubscribe), stops the listener task.
#[must_use = "dropping the subscription stops live updates"]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
