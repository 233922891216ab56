use tokio::sync::watch;

/// Sending side of the shutdown signal.
///
/// Shutdown is terminal: once requested it can never be withdrawn, and receivers created after
/// the request observe it immediately.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    pub fn wrap(tx: watch::Sender<bool>) -> Self {
        Self(tx)
    }

    /// Requests shutdown. Returns `true` if this call performed the transition.
    pub fn shutdown(&self) -> bool {
        self.0.send_if_modified(|requested| {
            if *requested {
                return false;
            }

            *requested = true;
            true
        })
    }

    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving side of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Completes once shutdown has been requested.
    ///
    /// A dropped sender can never request shutdown anymore, so it is treated as a shutdown too.
    pub async fn wait_for_shutdown(&mut self) {
        let _ = self.0.wait_for(|requested| *requested).await;
    }
}

pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx::wrap(tx), ShutdownRx(rx))
}
