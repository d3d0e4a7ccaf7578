use anyhow::{bail, Context, Result};
use umi_core::config::LinkConfig;
use umi_core::{CmdType, Transaction};
use umi_services::link::registers::{LOCAL_BASE, REMOTE_BASE, RESET_CTRL};
use umi_services::link::Channel;
use umi_services::{
    LinkController, LinkEndpoint, LinkError, LinkState, LoopbackSideband, MemoryResponder,
    Responder, SidebandPort,
};

use crate::{init_tracing, request};

fn config(width: Option<u8>, request_credits: u16) -> LinkConfig {
    LinkConfig {
        width,
        request_credits,
        poll_budget: 20,
        ..LinkConfig::default()
    }
}

async fn bring_up(cfg: LinkConfig) -> Result<LoopbackSideband> {
    let port = LoopbackSideband::new(&cfg)?;
    let mut ctl = LinkController::new(port, cfg);
    ctl.bring_up().await?;
    Ok(ctl.into_port())
}

/// Send `txn` from `tx` to `rx` beat by beat.
fn carry(tx: &mut LinkEndpoint, rx: &mut LinkEndpoint, txn: &Transaction) -> Result<Transaction> {
    let mut delivered = None;
    for fragment in tx.transmit(txn)? {
        if let Some(done) = rx.receive(fragment)? {
            delivered = Some(done);
        }
    }
    delivered.context("fragment stream ended without a packet")
}

#[tokio::test]
async fn request_and_response_cross_the_link() -> Result<()> {
    init_tracing();
    let mut port = bring_up(config(Some(2), 4)).await?;
    assert_eq!(port.local().state(), LinkState::Active);
    assert_eq!(port.local().tx_control().beat_bytes(), 4);

    let mut mem = MemoryResponder::default();
    let write = request(CmdType::ReqWrite, 2, 1, 0x800, 0x11, &[1, 2, 3, 4, 5, 6, 7, 8]);
    let read = request(CmdType::ReqRead, 2, 1, 0x800, 0x11, &[]);

    for req in [write, read] {
        let (local, remote) = port.endpoints_mut();
        let arrived = carry(local, remote, &req)?;
        assert_eq!(arrived, req);
        local.release(Channel::Request)?;

        let resp = mem.handle(&arrived)?.context("request must be answered")?;
        let (local, remote) = port.endpoints_mut();
        let back = carry(remote, local, &resp)?;
        remote.release(Channel::Response)?;
        assert_eq!(back.dstaddr, 0x11);
        if back.cmd.is(CmdType::RespRead) {
            assert_eq!(&back.data()?[..], &[1, 2, 3, 4, 5, 6, 7, 8]);
        }
    }
    assert_eq!(port.local().credits(Channel::Request), 4);
    assert_eq!(port.remote().credits(Channel::Response), 16);
    Ok(())
}

#[tokio::test]
async fn exhausted_credits_block_transmit() -> Result<()> {
    let mut port = bring_up(config(Some(1), 2)).await?;
    let posted = request(CmdType::ReqPosted, 0, 0, 0x10, 0x1, &[0xFF]);
    let local = port.local_mut();
    local.transmit(&posted)?;
    local.transmit(&posted)?;
    match local.transmit(&posted) {
        Err(LinkError::NoCredit { channel: Channel::Request }) => {}
        other => bail!("expected NoCredit, got {other:?}"),
    }
    assert_eq!(local.credits(Channel::Response), 16);

    local.release(Channel::Request)?;
    assert!(local.transmit(&posted).is_ok());
    local.release(Channel::Request)?;
    local.release(Channel::Request)?;
    assert!(matches!(
        local.release(Channel::Request),
        Err(LinkError::CreditOverflow { limit: 2, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn reset_takes_the_link_down() -> Result<()> {
    let mut port = bring_up(config(None, 16)).await?;
    port.posted_write(LOCAL_BASE + RESET_CTRL, 1).await?;
    assert_eq!(port.local().state(), LinkState::Reset);
    assert_eq!(port.remote().state(), LinkState::Active);

    let posted = request(CmdType::ReqPosted, 0, 0, 0x10, 0x1, &[0xFF]);
    assert!(matches!(
        port.local_mut().transmit(&posted),
        Err(LinkError::NotActive(LinkState::Reset))
    ));
    assert_eq!(port.read(LOCAL_BASE).await?, 1);
    assert_eq!(port.read(REMOTE_BASE).await?, 0);
    Ok(())
}

#[tokio::test]
async fn silent_peer_is_a_configuration_timeout() -> Result<()> {
    let cfg = config(Some(2), 16);
    let mut port = LoopbackSideband::new(&cfg)?;
    port.local_mut().set_phy_up(false);
    let mut ctl = LinkController::new(port, cfg);
    match ctl.bring_up().await {
        Err(LinkError::ConfigurationTimeout { base, polls: 20 }) => assert_eq!(base, LOCAL_BASE),
        other => bail!("expected a timeout, got {other:?}"),
    }
    Ok(())
}
