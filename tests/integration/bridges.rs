use anyhow::{bail, Context, Result};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use umi_core::config::{BridgeConfig, MemoryConfig};
use umi_core::{CmdType, CommandHeader, ResponseStatus, Transaction};
use umi_services::bridge::{
    Admission, ApbAdapter, ApbMemory, ApbRequest, ApbTarget, Axi4Adapter, AxiBeat, AxiRead,
    AxiRequest, AxiResponse, AxiWrite, Bridge, BridgeError, Burst, TileLinkAdapter, TlRequest,
    TlResponseOpcode,
};
use umi_services::{MemoryResponder, Responder};

use crate::{drain_bridge, init_tracing};

fn config() -> BridgeConfig {
    BridgeConfig {
        data_bytes: 4,
        ..BridgeConfig::default()
    }
}

fn axi_bridge(config: &BridgeConfig) -> Bridge<Axi4Adapter> {
    Bridge::new(Axi4Adapter::new(config.clone()), config)
}

fn full(data: [u8; 4]) -> AxiBeat {
    AxiBeat {
        data: data.to_vec(),
        strb: 0xF,
    }
}

fn axi_write(id: u64, addr: u64, burst: Burst, beats: Vec<AxiBeat>) -> AxiRequest {
    AxiRequest::Write(AxiWrite {
        id,
        addr,
        size: 2,
        burst,
        beats,
    })
}

fn axi_read(id: u64, addr: u64, len: u8) -> AxiRequest {
    AxiRequest::Read(AxiRead {
        id,
        addr,
        size: 2,
        len,
        burst: Burst::Incr,
    })
}

fn accept<T: std::fmt::Debug>(admission: Admission<T>) -> Result<usize> {
    match admission {
        Admission::Accepted(n) => Ok(n),
        Admission::Stalled(req) => bail!("unexpected stall for {req:?}"),
    }
}

// ── AXI ───────────────────────────────────────────────────────────────────────

#[test]
fn fixed_burst_keeps_only_the_last_beat() -> Result<()> {
    init_tracing();
    let mut mem = MemoryResponder::default();
    let mut bridge = axi_bridge(&config());
    let req = axi_write(
        3,
        0x100,
        Burst::Fixed,
        vec![full([1, 2, 3, 4]), full([5, 6, 7, 8]), full([9, 10, 11, 12])],
    );
    assert_eq!(accept(bridge.try_accept(req)?)?, 3);

    let responses = drain_bridge(&mut bridge, &mut mem)?;
    assert_eq!(responses, vec![AxiResponse::Write { id: 3, resp: 0 }]);
    assert_eq!(mem.memory().read(0x100, 4), vec![9, 10, 11, 12]);
    assert!(bridge.is_idle());
    Ok(())
}

#[test]
fn incr_burst_reads_back_what_it_wrote() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let mut mem = MemoryResponder::default();
    let mut bridge = axi_bridge(&config());

    let words: Vec<[u8; 4]> = (0..4).map(|_| rng.gen()).collect();
    let beats = words.iter().copied().map(full).collect();
    accept(bridge.try_accept(axi_write(1, 0x200, Burst::Incr, beats))?)?;
    accept(bridge.try_accept(axi_read(1, 0x200, 3))?)?;

    let responses = drain_bridge(&mut bridge, &mut mem)?;
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0], AxiResponse::Write { id: 1, resp: 0 });
    let AxiResponse::Read { id, beats } = &responses[1] else {
        bail!("expected a read response, got {:?}", responses[1]);
    };
    assert_eq!(*id, 1);
    let got: Vec<Vec<u8>> = beats.iter().map(|b| b.data.clone()).collect();
    let want: Vec<Vec<u8>> = words.iter().map(|w| w.to_vec()).collect();
    assert_eq!(got, want);
    assert!(beats.iter().all(|b| b.resp == 0));
    Ok(())
}

#[test]
fn axi_into_apb_target() -> Result<()> {
    let mut target = ApbTarget::new(ApbMemory::new(4), 4);
    let mut bridge = axi_bridge(&config());
    let partial = AxiBeat {
        data: vec![0, 0, 0x77, 0x88],
        strb: 0b1100,
    };
    accept(bridge.try_accept(axi_write(2, 0x10, Burst::Incr, vec![full([1, 2, 3, 4]), partial]))?)?;
    accept(bridge.try_accept(axi_read(2, 0x10, 1))?)?;

    let responses = drain_bridge(&mut bridge, &mut target)?;
    assert_eq!(responses[0], AxiResponse::Write { id: 2, resp: 0 });
    let AxiResponse::Read { beats, .. } = &responses[1] else {
        bail!("expected a read response");
    };
    assert_eq!(beats[0].data, vec![1, 2, 3, 4]);
    assert_eq!(beats[1].data, vec![0, 0, 0x77, 0x88]);
    assert_eq!(target.completer().memory().read(0x14, 2), vec![0, 0]);
    Ok(())
}

fn silent(data: [u8; 4]) -> AxiBeat {
    AxiBeat {
        data: data.to_vec(),
        strb: 0,
    }
}

#[test]
fn write_with_every_strobe_low_still_gets_a_response() -> Result<()> {
    let mut mem = MemoryResponder::default();
    let mut bridge = axi_bridge(&config());
    accept(bridge.try_accept(axi_read(6, 0x40, 0))?)?;
    let nothing = axi_write(6, 0x40, Burst::Incr, vec![silent([0xEE; 4])]);
    assert_eq!(accept(bridge.try_accept(nothing)?)?, 0);
    assert_eq!(bridge.queued_requests(), 1);
    assert!(bridge.pop_response().is_none());

    let responses = drain_bridge(&mut bridge, &mut mem)?;
    assert!(matches!(responses[0], AxiResponse::Read { id: 6, .. }));
    assert_eq!(responses[1], AxiResponse::Write { id: 6, resp: 0 });
    assert_eq!(mem.memory().footprint(), 0);
    assert!(bridge.is_idle());

    accept(bridge.try_accept(axi_write(8, 0x0, Burst::Fixed, vec![silent([0; 4])]))?)?;
    assert_eq!(bridge.pop_response(), Some(AxiResponse::Write { id: 8, resp: 0 }));
    Ok(())
}

#[test]
fn empty_write_waits_for_response_queue_room() -> Result<()> {
    let cfg = BridgeConfig {
        response_queue: 1,
        ..config()
    };
    let mut bridge = axi_bridge(&cfg);
    accept(bridge.try_accept(axi_write(1, 0x0, Burst::Incr, vec![silent([0; 4])]))?)?;
    accept(bridge.try_accept(axi_write(2, 0x0, Burst::Incr, vec![silent([0; 4])]))?)?;
    assert!(!bridge.protocol_ready());
    assert_eq!(bridge.outstanding(), 1);

    assert_eq!(bridge.pop_response(), Some(AxiResponse::Write { id: 1, resp: 0 }));
    assert_eq!(bridge.pop_response(), Some(AxiResponse::Write { id: 2, resp: 0 }));
    assert!(bridge.is_idle());
    Ok(())
}

// ── TileLink ──────────────────────────────────────────────────────────────────

#[test]
fn tilelink_partial_write_merges_with_existing_data() -> Result<()> {
    init_tracing();
    let cfg = config();
    let mut mem = MemoryResponder::default();
    let mut bridge = Bridge::new(TileLinkAdapter::new(cfg.clone()), &cfg);

    accept(bridge.try_accept(TlRequest::put_full(1, 0x40, 2, vec![0xAA; 4]))?)?;
    accept(bridge.try_accept(TlRequest::put_partial(1, 0x40, 2, 0b0011, vec![0xBB, 0xBB, 0, 0]))?)?;
    accept(bridge.try_accept(TlRequest::get(1, 0x40, 2))?)?;

    let responses = drain_bridge(&mut bridge, &mut mem)?;
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0].opcode, TlResponseOpcode::AccessAck);
    assert_eq!(responses[1].opcode, TlResponseOpcode::AccessAck);
    let get = &responses[2];
    assert_eq!(get.opcode, TlResponseOpcode::AccessAckData);
    assert!(!get.denied && !get.corrupt);
    let word: [u8; 4] = get.data[..].try_into()?;
    assert_eq!(u32::from_le_bytes(word), 0xAAAA_BBBB);
    Ok(())
}

// ── Error propagation ─────────────────────────────────────────────────────────

fn faulty_memory() -> MemoryResponder {
    let mut mem = MemoryResponder::new(&MemoryConfig {
        window: Some((0, 0x1000)),
        ..MemoryConfig::default()
    });
    mem.inject_error(0x300, ResponseStatus::SlvErr);
    mem
}

#[test]
fn responder_errors_reach_axi_verbatim() -> Result<()> {
    let mut mem = faulty_memory();
    let mut bridge = axi_bridge(&config());
    accept(bridge.try_accept(axi_write(7, 0x300, Burst::Incr, vec![full([0; 4])]))?)?;
    accept(bridge.try_accept(axi_read(7, 0x2000, 0))?)?;

    let responses = drain_bridge(&mut bridge, &mut mem)?;
    assert_eq!(
        responses[0],
        AxiResponse::Write {
            id: 7,
            resp: ResponseStatus::SlvErr.code()
        }
    );
    let AxiResponse::Read { beats, .. } = &responses[1] else {
        bail!("expected a read response");
    };
    assert_eq!(beats[0].resp, ResponseStatus::DecErr.code());
    Ok(())
}

#[test]
fn responder_errors_raise_pslverr() -> Result<()> {
    let cfg = config();
    let mut mem = faulty_memory();
    let mut bridge = Bridge::new(ApbAdapter::new(cfg.clone()), &cfg);
    accept(bridge.try_accept(ApbRequest::read(0x2000))?)?;
    accept(bridge.try_accept(ApbRequest::write(0x300, vec![1, 2, 3, 4], 0xF))?)?;
    accept(bridge.try_accept(ApbRequest::write(0x400, vec![1, 2, 3, 4], 0xF))?)?;

    let responses = drain_bridge(&mut bridge, &mut mem)?;
    let flags: Vec<bool> = responses.iter().map(|r| r.pslverr).collect();
    assert_eq!(flags, vec![true, true, false]);
    Ok(())
}

#[test]
fn responder_errors_set_denied_and_corrupt() -> Result<()> {
    let cfg = config();
    let mut mem = faulty_memory();
    let mut bridge = Bridge::new(TileLinkAdapter::new(cfg.clone()), &cfg);
    accept(bridge.try_accept(TlRequest::get(4, 0x2000, 2))?)?;
    accept(bridge.try_accept(TlRequest::put_full(4, 0x300, 2, vec![0; 4]))?)?;
    accept(bridge.try_accept(TlRequest::get(4, 0x300, 2))?)?;

    let responses = drain_bridge(&mut bridge, &mut mem)?;
    let flags: Vec<(bool, bool)> = responses.iter().map(|r| (r.denied, r.corrupt)).collect();
    assert_eq!(flags, vec![(true, true), (true, false), (false, true)]);
    Ok(())
}

// ── Backpressure and ordering ─────────────────────────────────────────────────

#[test]
fn full_request_queue_stalls_then_accepts() -> Result<()> {
    let cfg = BridgeConfig {
        request_queue: 2,
        ..config()
    };
    let mut bridge = axi_bridge(&cfg);
    assert!(bridge.try_accept(axi_read(1, 0x0, 0))?.is_accepted());
    assert!(bridge.try_accept(axi_read(2, 0x4, 0))?.is_accepted());
    assert!(!bridge.foreign_ready());

    let Admission::Stalled(stalled) = bridge.try_accept(axi_read(3, 0x8, 0))? else {
        bail!("third request should stall");
    };
    assert_eq!(bridge.queued_requests(), 2);
    assert!(bridge.poll_request().is_some());
    assert!(bridge.try_accept(stalled)?.is_accepted());

    let too_big = axi_write(4, 0x0, Burst::Fixed, vec![full([0; 4]); 3]);
    assert_eq!(
        bridge.try_accept(too_big).unwrap_err(),
        BridgeError::TooLarge {
            packets: 3,
            capacity: 2
        }
    );
    Ok(())
}

#[test]
fn full_response_queue_hands_the_packet_back() -> Result<()> {
    let cfg = BridgeConfig {
        response_queue: 1,
        ..config()
    };
    let mut mem = MemoryResponder::default();
    let mut bridge = axi_bridge(&cfg);
    accept(bridge.try_accept(axi_read(1, 0x0, 0))?)?;
    accept(bridge.try_accept(axi_read(2, 0x4, 0))?)?;

    let mut answers = Vec::new();
    while let Some(req) = bridge.poll_request() {
        answers.push(mem.handle(&req)?.context("read must be answered")?);
    }
    let mut answers = answers.into_iter();
    let first = answers.next().context("two answers")?;
    let second = answers.next().context("two answers")?;

    accept(bridge.push_response(first)?)?;
    assert!(!bridge.protocol_ready());
    let Admission::Stalled(second) = bridge.push_response(second)? else {
        bail!("second completion should stall");
    };
    assert!(matches!(bridge.pop_response(), Some(AxiResponse::Read { id: 1, .. })));
    accept(bridge.push_response(second)?)?;
    assert!(matches!(bridge.pop_response(), Some(AxiResponse::Read { id: 2, .. })));
    assert!(bridge.is_idle());
    Ok(())
}

#[test]
fn out_of_order_response_is_a_sequence_mismatch() -> Result<()> {
    let mut bridge = axi_bridge(&config());
    accept(bridge.try_accept(axi_write(5, 0x80, Burst::Incr, vec![full([1; 4])]))?)?;

    let cmd = CommandHeader::builder(CmdType::RespRead).size(2).build()?;
    let wrong = Transaction::new(cmd, 5, 0x80, vec![0u8; 4]);
    assert_eq!(
        bridge.push_response(wrong).unwrap_err(),
        BridgeError::SequenceMismatch {
            source_id: 5,
            expected: CmdType::RespWrite.code(),
            actual: CmdType::RespRead.code(),
        }
    );

    let cmd = CommandHeader::builder(CmdType::RespWrite).size(2).build()?;
    let stray = Transaction::new(cmd, 9, 0x80, Bytes::new());
    assert!(matches!(
        bridge.push_response(stray),
        Err(BridgeError::UnexpectedPacket { source_id: 9, .. })
    ));
    assert_eq!(bridge.outstanding(), 1);
    Ok(())
}
