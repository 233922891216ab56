//! Payload-free notification channels.
//!
//! A signal carries no data: it only tells receivers that shared state changed and should be
//! re-read. All receivers observe the same notification.

use tokio::sync::watch;

/// Transmitter side of a notification channel.
pub type SignalTx = watch::Sender<()>;

/// Receiver side of a notification channel.
pub type SignalRx = watch::Receiver<()>;

/// Creates a new notification channel.
pub fn create_signal() -> (SignalTx, SignalRx) {
    let (tx, rx) = watch::channel(());
    (tx, rx)
}

/// Notifies every receiver of `tx`.
///
/// Succeeds even when no receiver is currently subscribed.
pub fn notify(tx: &SignalTx) {
    tx.send_replace(());
}
