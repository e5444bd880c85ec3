//! PTT/COS driver abstraction (component b).
//!
//! `Ptt`/`Cos` are the narrow collaborator interfaces the playback scheduler
//! consumes (spec §6): `engage`/`disengage` for the transmit line,
//! `wait_for_clear`/`value` for carrier-operated squelch. The Raspberry Pi
//! implementation is grounded in `examples/original_source/broadcaster-radio/gpio.go`
//! (`go-gpiocdev`); the no-op default mirrors that source's `DefaultPTT`/
//! `DefaultCOS` so a radio with no GPIO wired still runs the full state
//! machine, just without ever blocking on channel-busy.

use async_trait::async_trait;

#[async_trait]
pub trait Ptt: Send + Sync {
    async fn engage(&self);
    async fn disengage(&self);
}

#[async_trait]
pub trait Cos: Send + Sync {
    /// Blocks until the channel reports clear (falling edge). Returns
    /// immediately if the driver is unconfigured or the channel is already
    /// clear.
    async fn wait_for_clear(&self);
    /// Current carrier-detect value, for status reporting.
    async fn value(&self) -> bool;
}

/// Used when no PTT pin is configured. Engage/disengage are no-ops besides
/// whatever status reporting the caller layers on top.
pub struct DefaultPtt;

#[async_trait]
impl Ptt for DefaultPtt {
    async fn engage(&self) {
        tracing::debug!("PTT: on (no GPIO configured)");
    }

    async fn disengage(&self) {
        tracing::debug!("PTT: off (no GPIO configured)");
    }
}

/// Used when no COS pin is configured: channel is always assumed clear.
pub struct DefaultCos;

#[async_trait]
impl Cos for DefaultCos {
    async fn wait_for_clear(&self) {
        tracing::debug!("assuming channel is clear since COS GPIO is not configured");
    }

    async fn value(&self) -> bool {
        false
    }
}

#[cfg(feature = "rpi-gpio")]
pub mod rpi {
    //! Raspberry Pi GPIO-backed `Ptt`/`Cos`, built on `gpiocdev`. Mirrors
    //! `PiPTT`/`PiCOS` from the original Go source: the PTT line is a
    //! simple output, the COS line is an input with edge-triggered
    //! notification feeding a watch channel that `wait_for_clear` awaits.

    use super::{Cos, Ptt};
    use async_trait::async_trait;
    use gpiocdev::line::EdgeKind;
    use gpiocdev::request::Request;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::watch;
    use tracing::info;

    pub struct RpiPtt {
        request: Request,
        pin: u32,
    }

    impl RpiPtt {
        pub fn open(chip: &str, pin: u32) -> anyhow::Result<Self> {
            let request = gpiocdev::Request::builder()
                .on_chip(chip)
                .with_line(pin)
                .as_output(gpiocdev::line::Value::Inactive)
                .request()?;
            Ok(Self { request, pin })
        }
    }

    #[async_trait]
    impl Ptt for RpiPtt {
        async fn engage(&self) {
            info!("PTT: on");
            let _ = self
                .request
                .set_value(self.pin, gpiocdev::line::Value::Active);
        }

        async fn disengage(&self) {
            info!("PTT: off");
            let _ = self
                .request
                .set_value(self.pin, gpiocdev::line::Value::Inactive);
        }
    }

    pub struct RpiCos {
        request: Arc<Request>,
        pin: u32,
        clear_tx: watch::Sender<bool>,
        last_falling: Arc<AtomicBool>,
    }

    impl RpiCos {
        pub fn open(chip: &str, pin: u32) -> anyhow::Result<Self> {
            let request = gpiocdev::Request::builder()
                .on_chip(chip)
                .with_line(pin)
                .as_input()
                .with_edge_detection(gpiocdev::line::EdgeDetection::BothEdges)
                .request()?;
            let request = Arc::new(request);
            let (clear_tx, _clear_rx) = watch::channel(true);
            let last_falling = Arc::new(AtomicBool::new(true));

            let edge_request = request.clone();
            let edge_tx = clear_tx.clone();
            let edge_flag = last_falling.clone();
            std::thread::spawn(move || loop {
                match edge_request.read_edge_event() {
                    Ok(event) => match event.kind {
                        EdgeKind::Falling => {
                            info!("COS: channel clear");
                            edge_flag.store(true, Ordering::SeqCst);
                            let _ = edge_tx.send(true);
                        }
                        EdgeKind::Rising => {
                            info!("COS: channel in use");
                            edge_flag.store(false, Ordering::SeqCst);
                            let _ = edge_tx.send(false);
                        }
                    },
                    Err(_) => break,
                }
            });

            Ok(Self {
                request,
                pin,
                clear_tx,
                last_falling,
            })
        }
    }

    #[async_trait]
    impl Cos for RpiCos {
        async fn wait_for_clear(&self) {
            if !self.value().await {
                return;
            }
            let mut rx = self.clear_tx.subscribe();
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    return;
                }
            }
        }

        async fn value(&self) -> bool {
            self.request
                .value(self.pin)
                .map(|v| v == gpiocdev::line::Value::Active)
                .unwrap_or(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn default_ptt_engage_disengage_never_blocks() {
        let ptt = DefaultPtt;
        tokio::time::timeout(Duration::from_millis(50), ptt.engage())
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_millis(50), ptt.disengage())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn default_cos_never_blocks_and_reports_clear() {
        let cos = DefaultCos;
        assert!(!cos.value().await);
        tokio::time::timeout(Duration::from_millis(50), cos.wait_for_clear())
            .await
            .unwrap();
    }
}
