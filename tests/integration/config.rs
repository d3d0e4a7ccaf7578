use std::collections::HashMap;

use anyhow::{Context, Result};
use umi_core::config::UmiConfig;
use umi_core::{CmdType, ConfigError};
use umi_services::bridge::{Axi4Adapter, AxiBeat, AxiRequest, AxiWrite, Bridge, Burst};
use umi_services::{LinkController, LoopbackSideband, MemoryResponder, Responder};

use crate::{drain_bridge, request};

const TESTBENCH: &str = r#"
[link]
width = 1
request_credits = 8
poll_budget = 10

[bridge]
data_bytes = 4
boundary = 16

[memory]
default_byte = 0xFF
window = [0, 4096]
"#;

#[test]
fn file_settings_drive_every_agent() -> Result<()> {
    let cfg = UmiConfig::from_toml_str(TESTBENCH)?;
    assert_eq!(cfg.link.width, Some(1));
    assert_eq!(cfg.link.response_credits, 16);
    assert_eq!(cfg.bridge.max_packet_bytes, 4096);

    let mut mem = MemoryResponder::new(&cfg.memory);
    let resp = mem
        .handle(&request(CmdType::ReqRead, 0, 1, 0x20, 0x1, &[]))?
        .context("read must be answered")?;
    assert_eq!(&resp.data()?[..], &[0xFF, 0xFF]);

    // Eight beats from 0x0C cross the 16-byte boundary twice.
    let mut bridge = Bridge::new(Axi4Adapter::new(cfg.bridge.clone()), &cfg.bridge);
    let beats = (0..8u8)
        .map(|i| AxiBeat {
            data: vec![i; 4],
            strb: 0xF,
        })
        .collect();
    let write = AxiRequest::Write(AxiWrite {
        id: 1,
        addr: 0x0C,
        size: 2,
        burst: Burst::Incr,
        beats,
    });
    assert!(bridge.try_accept(write)?.is_accepted());
    assert_eq!(bridge.queued_requests(), 3);
    assert_eq!(drain_bridge(&mut bridge, &mut mem)?.len(), 1);
    assert_eq!(mem.memory().read(0x0C, 4), vec![0; 4]);
    assert_eq!(mem.memory().read(0x28, 4), vec![7; 4]);
    Ok(())
}

#[tokio::test]
async fn link_settings_drive_bring_up() -> Result<()> {
    let cfg = UmiConfig::from_toml_str(TESTBENCH)?;
    let port = LoopbackSideband::new(&cfg.link)?;
    let mut ctl = LinkController::new(port, cfg.link.clone());
    ctl.bring_up().await?;
    let port = ctl.into_port();
    assert_eq!(port.local().tx_control().beat_bytes(), 2);
    assert_eq!(port.local().rx_control().width, 1);
    Ok(())
}

#[test]
fn environment_overrides_the_file() -> Result<()> {
    let mut cfg = UmiConfig::from_toml_str(TESTBENCH)?;
    let env: HashMap<&str, &str> = [
        ("UMI_LINK__WIDTH", "3"),
        ("UMI_BRIDGE__DATA_BYTES", "8"),
        ("UMI_MEMORY__DEFAULT_BYTE", "0x5a"),
        ("UMI_LINK__POLL_BUDGET", "not-a-number"),
    ]
    .into_iter()
    .collect();
    cfg.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));
    assert_eq!(cfg.link.width, Some(3));
    assert_eq!(cfg.bridge.data_bytes, 8);
    assert_eq!(cfg.memory.default_byte, 0x5A);
    assert_eq!(cfg.link.poll_budget, 10);
    Ok(())
}

#[test]
fn invalid_settings_are_rejected() {
    let err = UmiConfig::from_toml_str("[bridge]\ndata_bytes = 6\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "bridge.data_bytes", .. }));

    let err = UmiConfig::from_toml_str("[link]\nwidth = 9\n").unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { key: "link.width", .. }));

    assert!(matches!(
        UmiConfig::from_toml_str("[link]\nwidth = \"wide\"\n"),
        Err(ConfigError::ParseInline(_))
    ));
}
