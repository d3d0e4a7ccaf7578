use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc};
use umi_core::{CmdType, CommandHeader, Transaction};
use umi_services::{MemoryResponder, ResponderTask, Scoreboard, ScoreboardError};

use crate::{init_tracing, request};

const HOSTS: u64 = 3;
const ROUNDS: u64 = 6;

fn ack_for(req: &Transaction) -> Result<Transaction> {
    let cmd = CommandHeader::builder(CmdType::RespWrite)
        .size(req.cmd.size() as u64)
        .len(req.cmd.len() as u64)
        .eom(true)
        .build()?;
    Ok(Transaction::new(cmd, req.srcaddr, req.dstaddr, Bytes::new()))
}

fn data_for(req: &Transaction, data: &[u8]) -> Result<Transaction> {
    let cmd = CommandHeader::builder(CmdType::RespRead)
        .size(req.cmd.size() as u64)
        .len(req.cmd.len() as u64)
        .eom(true)
        .build()?;
    Ok(Transaction::new(cmd, req.srcaddr, req.dstaddr, data.to_vec()))
}

/// Several hosts stream writes, posted writes and reads through one
/// responder task; every host sees its responses in issue order.
#[tokio::test]
async fn responder_task_preserves_per_host_order() -> Result<()> {
    init_tracing();
    let (req_tx, req_rx) = mpsc::channel(4);
    let (resp_tx, mut resp_rx) = mpsc::channel(4);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(
        ResponderTask::new(MemoryResponder::default(), req_rx, resp_tx, shutdown_rx).run(),
    );

    let scoreboard = Scoreboard::new();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut requests = Vec::new();
    for round in 0..ROUNDS {
        for host in 1..=HOSTS {
            let addr = host * 0x1000 + round * 0x10;
            let data: [u8; 8] = rng.gen();
            let posted: [u8; 8] = rng.gen();

            let write = request(CmdType::ReqWrite, 3, 0, addr, host, &data);
            scoreboard.expect(host, ack_for(&write)?);
            let read = request(CmdType::ReqRead, 3, 0, addr, host, &[]);
            scoreboard.expect(host, data_for(&read, &data)?);
            let post = request(CmdType::ReqPosted, 3, 0, addr + 8, host, &posted);
            let reread = request(CmdType::ReqRead, 2, 1, addr + 8, host, &[]);
            scoreboard.expect(host, data_for(&reread, &posted)?);

            requests.extend([write, read, post, reread]);
        }
    }
    let expected = (HOSTS * ROUNDS * 3) as usize;

    let feeder = req_tx.clone();
    let producer = tokio::spawn(async move {
        for req in requests {
            if feeder.send(req).await.is_err() {
                break;
            }
        }
    });

    for _ in 0..expected {
        let resp = tokio::time::timeout(Duration::from_secs(5), resp_rx.recv())
            .await?
            .context("response channel closed early")?;
        scoreboard.observe(&resp)?;
    }
    assert!(scoreboard.is_drained());
    producer.await?;

    shutdown_tx.send(())?;
    let responder = task.await??;
    assert_eq!(responder.memory().footprint(), (HOSTS * ROUNDS * 16) as usize);
    Ok(())
}

#[tokio::test]
async fn closed_request_channel_ends_the_task() -> Result<()> {
    let (req_tx, req_rx) = mpsc::channel(1);
    let (resp_tx, _resp_rx) = mpsc::channel(1);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(
        ResponderTask::new(MemoryResponder::default(), req_rx, resp_tx, shutdown_rx).run(),
    );
    req_tx
        .send(request(CmdType::ReqPosted, 0, 0, 0x5, 0x1, &[0x42]))
        .await?;
    drop(req_tx);
    let responder = task.await??;
    assert_eq!(responder.memory().read(0x5, 1), vec![0x42]);
    Ok(())
}

#[tokio::test]
async fn response_opcode_as_request_is_fatal() -> Result<()> {
    let (req_tx, req_rx) = mpsc::channel(1);
    let (resp_tx, _resp_rx) = mpsc::channel(1);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let task = tokio::spawn(
        ResponderTask::new(MemoryResponder::default(), req_rx, resp_tx, shutdown_rx).run(),
    );
    let cmd = CommandHeader::builder(CmdType::RespWrite).build()?;
    req_tx.send(Transaction::new(cmd, 0, 0, Bytes::new())).await?;
    assert!(task.await?.is_err());
    Ok(())
}

#[test]
fn swapped_responses_fail_the_scoreboard() -> Result<()> {
    let scoreboard = Scoreboard::new();
    let first = request(CmdType::ReqRead, 0, 0, 0x10, 0x7, &[]);
    let second = request(CmdType::ReqRead, 0, 0, 0x11, 0x7, &[]);
    let resp_a = data_for(&first, &[0xA])?;
    let resp_b = data_for(&second, &[0xB])?;
    scoreboard.expect(7, resp_a.clone());
    scoreboard.expect(7, resp_b.clone());

    assert!(matches!(
        scoreboard.observe(&resp_b),
        Err(ScoreboardError::SequenceMismatch { source_id: 7, .. })
    ));
    assert_eq!(scoreboard.outstanding(7), 2);
    scoreboard.observe(&resp_a)?;
    scoreboard.observe(&resp_b)?;
    assert!(matches!(
        scoreboard.observe(&resp_b),
        Err(ScoreboardError::UnexpectedPacket { source_id: 7, .. })
    ));
    Ok(())
}
