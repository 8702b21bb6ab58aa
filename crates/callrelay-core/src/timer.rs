//! Ring Timer Registry.
//!
//! The only timed operation in the system: a bounded, cancelable resend
//! of the `ring` notification. Per spec.md §9 ("Timers as first-class
//! events"), a timer never mutates `Room` state directly — it only
//! re-enters the owning `Room`'s serialized command loop, which performs
//! the actual re-validation ("is this still the Active Call, still this
//! id, still not started?") and is therefore free to treat every fire as
//! a no-op if stale.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

/// Interval between `ring` resends.
pub const RING_RESEND_INTERVAL: Duration = Duration::from_millis(800);

/// Number of resends attempted before the server stops trying
/// (≈5s total window, matching spec.md §4.4).
pub const RING_RESEND_MAX_ATTEMPTS: u32 = 6;

/// Handle to a running ring timer. Dropping it does not cancel the
/// timer — call [`RingTimer::cancel`] explicitly, mirroring how the
/// owning `Call` cancels its own timer on every transition out of
/// RINGING.
pub struct RingTimer {
    cancel_tx: watch::Sender<bool>,
}

impl RingTimer {
    /// Discard any pending fire. Idempotent.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }
}

/// Spawn a ring timer that invokes `fire(attempt)` after each interval,
/// up to [`RING_RESEND_MAX_ATTEMPTS`] times, until canceled.
///
/// `fire` is generic over the caller's notion of "resend" so this module
/// has no dependency on `Room`/`Call` types: in practice it sends a
/// `RingTimerFired` command back into the owning room's mailbox.
pub fn spawn_ring_timer<F, Fut>(mut fire: F) -> RingTimer
where
    F: FnMut(u32) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        for attempt in 1..=RING_RESEND_MAX_ATTEMPTS {
            tokio::select! {
                _ = tokio::time::sleep(RING_RESEND_INTERVAL) => {}
                _ = cancel_rx.changed() => {}
            }
            if *cancel_rx.borrow() {
                return;
            }
            fire(attempt).await;
        }
    });
    RingTimer { cancel_tx }
}
