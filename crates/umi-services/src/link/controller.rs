//! Link bring-up over the side-band.

use std::time::Duration;

use umi_core::config::LinkConfig;

use super::registers::*;
use super::{LinkError, SidebandPort};

/// Brings a local/remote endpoint pair to the active state.
pub struct LinkController<P> {
    port: P,
    config: LinkConfig,
}

impl<P: SidebandPort> LinkController<P> {
    pub fn new(port: P, config: LinkConfig) -> Self {
        Self { port, config }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn into_port(self) -> P {
        self.port
    }

    /// Release reset and, if a width is configured, reprogram both ends.
    ///
    /// Without a width only reset release and link-active polling happen;
    /// endpoints leave reset enabled with default credits. A link that never
    /// reports active within the polling budget is `ConfigurationTimeout`.
    pub async fn bring_up(&mut self) -> Result<(), LinkError> {
        tracing::info!(width = ?self.config.width, "link bring-up");

        for base in [LOCAL_BASE, REMOTE_BASE] {
            self.port.posted_write(base + RESET_CTRL, 0).await?;
            if self.port.read(base + RESET_STATUS).await? != 0 {
                return Err(LinkError::ResetStuck { base });
            }
        }

        self.wait_active(LOCAL_BASE).await?;
        self.wait_active(REMOTE_BASE).await?;

        let Some(width) = self.config.width else {
            tracing::info!("link active (auto mode)");
            return Ok(());
        };

        let off = Control::disabled(width).encode()?;
        let on = Control::enabled(width).encode()?;
        let on_credit = Control::enabled(width).with_credit().encode()?;
        let credits = CreditInit {
            request: self.config.request_credits,
            response: self.config.response_credits,
        }
        .encode();

        // Disable Tx before Rx so nothing is in flight when Rx drops.
        self.write(REMOTE_BASE + TX_CTRL, 0).await?;
        self.write(LOCAL_BASE + TX_CTRL, 0).await?;
        tokio::time::sleep(self.interval()).await;
        self.write(LOCAL_BASE + RX_CTRL, 0).await?;
        self.write(REMOTE_BASE + RX_CTRL, 0).await?;

        self.write(LOCAL_BASE + TX_CTRL, off).await?;
        self.write(REMOTE_BASE + TX_CTRL, off).await?;
        self.write(LOCAL_BASE + RX_CTRL, off).await?;
        self.write(REMOTE_BASE + RX_CTRL, off).await?;

        self.write(REMOTE_BASE + TX_CREDIT_INIT, credits).await?;
        self.write(LOCAL_BASE + TX_CREDIT_INIT, credits).await?;

        // Rx must be live on both ends before any Tx (and its credit
        // accounting) comes back.
        self.write(LOCAL_BASE + RX_CTRL, on).await?;
        self.write(REMOTE_BASE + RX_CTRL, on).await?;
        self.write(REMOTE_BASE + TX_CTRL, on).await?;
        self.write(LOCAL_BASE + TX_CTRL, on).await?;
        self.write(REMOTE_BASE + TX_CTRL, on_credit).await?;
        self.write(LOCAL_BASE + TX_CTRL, on_credit).await?;

        self.wait_active(LOCAL_BASE).await?;
        self.wait_active(REMOTE_BASE).await?;
        tracing::info!(width, beat_bytes = 1usize << width, "link active");
        Ok(())
    }

    async fn write(&mut self, addr: u64, value: u32) -> Result<(), LinkError> {
        tracing::debug!(addr, value, "link register write");
        self.port.posted_write(addr, value).await
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    async fn wait_active(&mut self, base: u64) -> Result<(), LinkError> {
        for poll in 0..self.config.poll_budget {
            if self.port.read(base + LINK_ACTIVE).await? & 1 == 1 {
                tracing::debug!(base, polls = poll + 1, "link active");
                return Ok(());
            }
            tokio::time::sleep(self.interval()).await;
        }
        tracing::warn!(base, polls = self.config.poll_budget, "link never became active");
        Err(LinkError::ConfigurationTimeout {
            base,
            polls: self.config.poll_budget,
        })
    }
}
