use anyhow::Result;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use umi_core::transaction::reassemble;
use umi_core::{CmdType, CommandHeader, Fragment, FragmentAssembler, Transaction, WireError};

use crate::{init_tracing, request};

#[test]
fn write_header_encodes_to_known_word() -> Result<()> {
    let cmd = CommandHeader::builder(CmdType::ReqWrite).size(2).eom(true).build()?;
    assert_eq!(cmd.encode(), 0x0040_0043);

    let txn = Transaction::new(cmd, 0x1122_3344, 0xAABB, vec![1, 2, 3, 4]);
    let wire = txn.to_wire();
    assert_eq!(&wire[..4], &[0x43, 0x00, 0x40, 0x00]);
    assert_eq!(&wire[4..12], &0x1122_3344u64.to_le_bytes());
    assert_eq!(&wire[12..20], &0xAABBu64.to_le_bytes());
    assert_eq!(&wire[20..], &[1, 2, 3, 4]);
    assert_eq!(Transaction::from_wire(&wire, 64)?, txn);
    Ok(())
}

#[test]
fn random_packets_survive_the_link() -> Result<()> {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    for _ in 0..64 {
        let size = rng.gen_range(0..=3u64);
        let len = rng.gen_range(0..16u64);
        let bytes = ((len + 1) << size) as usize;
        let payload: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
        let txn = request(CmdType::ReqWrite, size, len, rng.gen(), rng.gen(), &payload);

        let beat = 1usize << rng.gen_range(0..5u32);
        let mut assembler = FragmentAssembler::new(64)?;
        let mut rebuilt = None;
        for fragment in txn.split_for_link(beat, true, None)? {
            assert_eq!(fragment.data.len(), beat);
            if let Some(done) = assembler.push(fragment)? {
                rebuilt = Some(done);
            }
        }
        assert_eq!(rebuilt.as_ref(), Some(&txn));
        assert_eq!(assembler.pending(), 0);
    }
    Ok(())
}

#[test]
fn payload_only_stream_drops_padding() -> Result<()> {
    let payload: Vec<u8> = (0..10).collect();
    let txn = request(CmdType::ReqWrite, 0, 9, 0x40, 0x1, &payload);
    let fragments: Vec<Fragment> = txn.split_for_link(4, false, None)?.collect();
    assert_eq!(fragments.len(), 3);
    assert_eq!(&fragments[2].data[..], &[8, 9, 0, 0]);
    assert_eq!(&reassemble(fragments, txn.declared_len())?[..], &payload[..]);
    Ok(())
}

#[test]
fn premature_end_of_message_is_an_underrun() -> Result<()> {
    let txn = request(CmdType::ReqWrite, 2, 3, 0x80, 0x2, &[0xA5; 16]);
    let mut fragments: Vec<Fragment> = txn.split_for_link(8, true, None)?.collect();
    fragments[3].last = true;

    let mut assembler = FragmentAssembler::new(64)?;
    let mut outcome = Ok(None);
    for fragment in fragments.into_iter().take(4) {
        outcome = assembler.push(fragment);
        if !matches!(outcome, Ok(None)) {
            break;
        }
    }
    assert!(matches!(
        outcome,
        Err(WireError::PayloadUnderrun { needed: 16, available: 12 })
    ));
    assert_eq!(assembler.pending(), 0);
    Ok(())
}

#[test]
fn narrow_address_space_round_trips() -> Result<()> {
    let cmd = CommandHeader::builder(CmdType::ReqRead).size(2).len(1).build()?;
    let txn = Transaction::with_addr_width(cmd, 0x7000_0010, 0x42, Bytes::new(), 32)?;
    assert_eq!(txn.header_len(), 12);
    let wire = txn.to_wire();
    assert_eq!(wire.len(), 12);
    assert_eq!(Transaction::from_wire(&wire, 32)?, txn);

    let too_wide = Transaction::with_addr_width(cmd, 1 << 40, 0, Bytes::new(), 32);
    assert!(matches!(too_wide, Err(WireError::OutOfRange { field: "dstaddr", .. })));
    Ok(())
}

#[test]
fn digest_tracks_wire_bytes() {
    let a = request(CmdType::ReqWrite, 0, 0, 0x10, 0x1, &[7]);
    let b = request(CmdType::ReqWrite, 0, 0, 0x10, 0x1, &[7]);
    let c = request(CmdType::ReqWrite, 0, 0, 0x10, 0x1, &[8]);
    assert_eq!(a.digest(), b.digest());
    assert_ne!(a.digest(), c.digest());
}
