//! `packetfs tx`

use super::{usage, Context};
use anyhow::{bail, Context as _};
use clap::Args;
use pfs_dataplane::socket::page_size;
use pfs_dataplane::{TxConfig, TxEngine, TxGeometry, BATCH_SIZE};
use pfs_wire::{MacAddr, Op};

#[derive(Args, Debug)]
pub struct TxArgs {
    /// Interface to transmit on
    #[arg(long, env = "IFACE")]
    pub iface: Option<String>,

    /// Destination MAC (colon-hex)
    #[arg(long, env = "DST_MAC")]
    pub dst_mac: Option<MacAddr>,

    /// Source MAC; read from the interface when unset
    #[arg(long)]
    pub src_mac: Option<MacAddr>,

    /// Payload bytes per frame
    #[arg(long = "len", env = "LEN", default_value_t = 64)]
    pub payload_len: usize,

    /// Seconds to run
    #[arg(long, env = "DURATION")]
    pub duration: Option<f64>,

    /// Payload op: 0 none, 1 xor, 2 add
    #[arg(long, env = "PFS_OP", default_value = "0", value_parser = parse_op)]
    pub op: Op,

    /// Immediate for the op
    #[arg(long, env = "IMM", default_value_t = 0)]
    pub imm: u8,

    /// Slots filled per submit
    #[arg(long, env = "BATCH_FRAMES", default_value_t = BATCH_SIZE)]
    pub batch_frames: usize,

    /// Ring frame size
    #[arg(long, env = "FRAME_SZ")]
    pub frame_size: Option<usize>,

    /// Ring block size
    #[arg(long, env = "BLOCK_SZ")]
    pub block_size: Option<usize>,

    /// Ring block count
    #[arg(long, env = "BLOCKS")]
    pub blocks: Option<usize>,

    /// Frames per second (0 = as fast as the ring drains)
    #[arg(long, default_value_t = 0)]
    pub pps: u64,

    /// Stop after this many frames
    #[arg(long)]
    pub frames: Option<u64>,

    /// Zero payloads instead of the byte ramp
    #[arg(long)]
    pub zeros: bool,

    /// Keep the qdisc layer in the path
    #[arg(long)]
    pub no_qdisc_bypass: bool,

    /// Report interval in ms (0 disables)
    #[arg(long, env = "REPORT_MS")]
    pub report_ms: Option<u64>,
}

pub(crate) fn parse_op(s: &str) -> Result<Op, String> {
    let code: u8 = s.trim().parse().map_err(|_| format!("op {s:?} is not a number"))?;
    Op::from_code(code).ok_or_else(|| format!("op {code} is not one of 0, 1, 2"))
}

impl TxArgs {
    fn into_config(self, ctx: &Context) -> TxConfig {
        let defaults = TxGeometry::default();
        TxConfig {
            iface: self.iface.or_else(|| ctx.profile.iface.clone()).unwrap_or_else(|| "lo".into()),
            dst_mac: self.dst_mac.or(ctx.profile.dst_mac).unwrap_or(MacAddr::BROADCAST),
            src_mac: self.src_mac,
            payload_len: self.payload_len,
            op: self.op,
            imm: self.imm,
            ramp: !self.zeros,
            batch_frames: self.batch_frames,
            pps: self.pps,
            geometry: TxGeometry {
                frame_size: self.frame_size.unwrap_or(defaults.frame_size),
                block_size: self.block_size.unwrap_or(defaults.block_size),
                blocks: self.blocks.unwrap_or(defaults.blocks),
            },
            qdisc_bypass: !self.no_qdisc_bypass,
            max_frames: self.frames,
            duration_secs: self.duration,
            report_ms: ctx.report_ms(self.report_ms),
        }
    }
}

pub fn handle(args: TxArgs, ctx: &Context) -> anyhow::Result<()> {
    let config = args.into_config(ctx);
    config.validate(page_size()).map_err(usage)?;
    let iface = config.iface.clone();

    let engine = TxEngine::new(config, ctx.stop.clone());
    let summary = engine.run().with_context(|| format!("tx on {iface}"))?;
    ctx.format.print(&summary)?;

    if let Some(err) = &summary.error {
        bail!("tx on {iface} stopped early: {err}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::output::OutputFormat;

    #[test]
    fn test_parse_op() {
        assert_eq!(parse_op("1").unwrap(), Op::Xor);
        assert_eq!(parse_op(" 2").unwrap(), Op::Add);
        assert!(parse_op("3").is_err());
        assert!(parse_op("xor").is_err());
    }

    #[test]
    fn test_profile_fills_gaps() {
        let ctx = Context::new(
            OutputFormat::Text,
            Profile {
                iface: Some("eth9".into()),
                dst_mac: Some(MacAddr([2, 0, 0, 0, 0, 9])),
                ..Default::default()
            },
        );
        let args = TxArgs {
            iface: None,
            dst_mac: None,
            src_mac: None,
            payload_len: 128,
            duration: Some(1.5),
            op: Op::Xor,
            imm: 0x5a,
            batch_frames: 16,
            frame_size: None,
            block_size: Some(8192),
            blocks: None,
            pps: 0,
            frames: None,
            zeros: false,
            no_qdisc_bypass: true,
            report_ms: None,
        };
        let cfg = args.into_config(&ctx);
        assert_eq!(cfg.iface, "eth9");
        assert_eq!(cfg.dst_mac, MacAddr([2, 0, 0, 0, 0, 9]));
        assert_eq!(cfg.geometry.block_size, 8192);
        assert_eq!(cfg.geometry.frame_size, TxGeometry::default().frame_size);
        assert!(!cfg.qdisc_bypass);
        assert!(cfg.ramp);
        cfg.validate(4096).unwrap();
    }
}
