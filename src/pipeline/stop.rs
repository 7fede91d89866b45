use tokio_util::sync::CancellationToken;

/// Cooperative stop flag shared between a session and its controllers
#[derive(Clone, Default)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; repeated calls have no further effect
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once `stop()` has been called
    pub async fn stopped(&self) {
        self.token.cancelled().await;
    }

    /// Token for tasks that already speak `CancellationToken`
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
