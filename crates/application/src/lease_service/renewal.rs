use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::handle::HandleState;

/// Background renewal loop owned by one lease handle.
pub(super) struct RenewalTask {
    token: CancellationToken,
    join_handle: JoinHandle<()>,
}

impl RenewalTask {
    pub(super) fn spawn(state: Arc<HandleState>, period: Duration) -> Self {
        let token = CancellationToken::new();
        let loop_token = token.clone();

        let join_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the lease was just written.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = state.renew(false).await {
                            warn!(error = %error, "lease auto-renewal stopped");
                            break;
                        }
                    }
                }
            }
        });

        Self { token, join_handle }
    }

    /// Stops the loop and waits for an in-flight renewal to finish.
    pub(super) async fn stop(self) {
        self.token.cancel();
        if let Err(error) = self.join_handle.await
            && error.is_panic()
        {
            warn!(error = %error, "lease auto-renewal task panicked");
        }
    }

    pub(super) fn cancel(&self) {
        self.token.cancel();
    }
}
