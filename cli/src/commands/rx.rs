//! `packetfs rx`

use super::{usage, Context};
use anyhow::Context as _;
use clap::Args;
use pfs_dataplane::socket::page_size;
use pfs_dataplane::{RxConfig, RxEngine, RxGeometry};

#[derive(Args, Debug)]
pub struct RxArgs {
    /// Interface to receive on
    #[arg(long, env = "IFACE")]
    pub iface: Option<String>,

    /// Seconds to run
    #[arg(long, env = "DURATION")]
    pub duration: Option<f64>,

    /// Report interval in ms (0 disables)
    #[arg(long, env = "REPORT_MS")]
    pub report_ms: Option<u64>,

    /// Op applied to each payload: 0 none, 1 xor, 2 add; other codes are
    /// counted as unknown
    #[arg(long, env = "PFS_OP", default_value_t = 0)]
    pub op: u8,

    /// Immediate for the op
    #[arg(long, env = "IMM", default_value_t = 0)]
    pub imm: u8,

    /// Ring frame size
    #[arg(long, env = "FRAME_SZ")]
    pub frame_size: Option<usize>,

    /// Ring block size
    #[arg(long, env = "BLOCK_SZ")]
    pub block_size: Option<usize>,

    /// Frames per block
    #[arg(long, env = "FRAMES_PER_BLOCK")]
    pub frames_per_block: Option<usize>,

    /// Ring block count
    #[arg(long, env = "BLOCKS")]
    pub blocks: Option<usize>,

    /// Block retire timeout in ms
    #[arg(long, env = "RETIRE_MS")]
    pub retire_ms: Option<u32>,

    /// Check payloads against the TX byte ramp after the op
    #[arg(long)]
    pub verify_ramp: bool,

    /// Do not join the promiscuous set
    #[arg(long)]
    pub no_promisc: bool,
}

impl RxArgs {
    fn into_config(self, ctx: &Context) -> RxConfig {
        let defaults = RxGeometry::default();
        let frame_size = self.frame_size.unwrap_or(defaults.frame_size);
        let block_size = self.block_size.unwrap_or(defaults.block_size);
        RxConfig {
            iface: self.iface.or_else(|| ctx.profile.iface.clone()).unwrap_or_else(|| "lo".into()),
            op: self.op,
            imm: self.imm,
            verify_ramp: self.verify_ramp,
            promiscuous: !self.no_promisc,
            geometry: RxGeometry {
                frame_size,
                block_size,
                frames_per_block: self.frames_per_block.unwrap_or(block_size / frame_size.max(1)),
                blocks: self.blocks.unwrap_or(defaults.blocks),
                retire_ms: self.retire_ms.unwrap_or(defaults.retire_ms),
            },
            duration_secs: self.duration,
            report_ms: ctx.report_ms(self.report_ms),
        }
    }
}

pub fn handle(args: RxArgs, ctx: &Context) -> anyhow::Result<()> {
    let config = args.into_config(ctx);
    config.validate(page_size()).map_err(usage)?;
    let iface = config.iface.clone();

    let engine = RxEngine::new(config, ctx.stop.clone());
    let summary = engine.run().with_context(|| format!("rx on {iface}"))?;
    ctx.format.print(&summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::output::OutputFormat;

    fn args() -> RxArgs {
        RxArgs {
            iface: Some("eth0".into()),
            duration: None,
            report_ms: Some(500),
            op: 1,
            imm: 0x5a,
            frame_size: None,
            block_size: None,
            frames_per_block: None,
            blocks: None,
            retire_ms: None,
            verify_ramp: false,
            no_promisc: false,
        }
    }

    #[test]
    fn test_frames_per_block_follows_sizes() {
        let ctx = Context::new(OutputFormat::Text, Profile::default());
        let cfg = RxArgs {
            block_size: Some(1 << 16),
            ..args()
        }
        .into_config(&ctx);
        assert_eq!(cfg.geometry.frames_per_block, (1 << 16) / cfg.geometry.frame_size);
        assert_eq!(cfg.report_ms, 500);
        assert!(cfg.promiscuous);
        cfg.validate(4096).unwrap();
    }

    #[test]
    fn test_explicit_mismatch_is_rejected() {
        let ctx = Context::new(OutputFormat::Text, Profile::default());
        let cfg = RxArgs {
            frames_per_block: Some(3),
            ..args()
        }
        .into_config(&ctx);
        assert!(cfg.validate(4096).is_err());
    }
}
