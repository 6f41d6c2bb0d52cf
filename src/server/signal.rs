//! Signal Bridge
//!
//! Turns the interrupt signal into an ordinary readiness event. tokio's signal
//! driver installs the process handler, which only records the delivery and
//! wakes the runtime; the reactor then sees the bridge slot become ready like
//! any socket and shuts down from normal code.
//!
//! `SIGPIPE` needs no handling here: Rust programs start with it ignored, so a
//! write to a vanished client fails with `BrokenPipe` instead of killing the
//! process.

use std::io;
use std::task::{Context, Poll};
use tokio::signal::unix::{signal, Signal, SignalKind};

/// A registered signal stream plus the number it reports on delivery.
#[derive(Debug)]
pub struct SignalBridge {
    signal: Signal,
    kind: SignalKind,
}

impl SignalBridge {
    /// Listens for `SIGINT`.
    pub fn install() -> io::Result<Self> {
        Self::for_kind(SignalKind::interrupt())
    }

    /// Listens for an arbitrary signal.
    pub fn for_kind(kind: SignalKind) -> io::Result<Self> {
        Ok(Self {
            signal: signal(kind)?,
            kind,
        })
    }

    /// The raw signal number, used for the `128 + n` exit status.
    pub fn signal_number(&self) -> i32 {
        self.kind.as_raw_value()
    }

    /// `Ready(true)` once a signal was delivered, `Ready(false)` if the
    /// signal driver went away.
    pub fn poll_delivered(&mut self, cx: &mut Context<'_>) -> Poll<bool> {
        self.signal.poll_recv(cx).map(|received| received.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;
    use std::time::Duration;

    #[tokio::test]
    async fn test_delivery_becomes_ready() {
        let kind = SignalKind::user_defined2();
        let mut bridge = SignalBridge::for_kind(kind).unwrap();
        assert_eq!(bridge.signal_number(), kind.as_raw_value());

        let status = std::process::Command::new("kill")
            .arg(format!("-{}", kind.as_raw_value()))
            .arg(std::process::id().to_string())
            .status()
            .unwrap();
        assert!(status.success());

        let delivered = tokio::time::timeout(
            Duration::from_secs(5),
            poll_fn(|cx| bridge.poll_delivered(cx)),
        )
        .await
        .unwrap();
        assert!(delivered);
    }
}
