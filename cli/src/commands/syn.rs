//! `packetfs syn`

use super::{usage, Context};
use anyhow::bail;
use clap::Args;
use pfs_common::{Ipv4Range, PortList};
use pfs_probe::{ProbeConfig, SynEmitter};
use std::net::Ipv4Addr;

#[derive(Args, Debug)]
pub struct SynArgs {
    /// Destination range
    #[arg(long)]
    pub cidr: Ipv4Range,

    /// Destination ports (comma list, ranges like 22-25)
    #[arg(long)]
    pub ports: PortList,

    /// Source address written into the probes
    #[arg(long)]
    pub src_ip: Option<Ipv4Addr>,

    /// Source port
    #[arg(long, default_value_t = 40000)]
    pub src_port: u16,

    /// Probes per second (0 = unpaced)
    #[arg(long, default_value_t = 0)]
    pub pps: u64,

    /// IP time-to-live
    #[arg(long, default_value_t = 64)]
    pub ttl: u8,

    /// Seconds to run
    #[arg(long, env = "DURATION")]
    pub duration: Option<f64>,

    /// Repeat the sweep until stopped or the duration runs out
    #[arg(long = "loop")]
    pub loop_sweep: bool,

    /// Do not require the source address to be local
    #[arg(long)]
    pub skip_self_test: bool,

    /// Report interval in ms (0 disables)
    #[arg(long, env = "REPORT_MS")]
    pub report_ms: Option<u64>,
}

impl SynArgs {
    fn into_config(self, ctx: &Context) -> anyhow::Result<ProbeConfig> {
        let src_ip = self
            .src_ip
            .or(ctx.profile.src_ip)
            .ok_or_else(|| usage("--src-ip is required (or src_ip in the profile)"))?;
        Ok(ProbeConfig {
            cidr: self.cidr,
            ports: self.ports,
            src_ip,
            src_port: self.src_port,
            pps: self.pps,
            ttl: self.ttl,
            duration_secs: self.duration,
            loop_sweep: self.loop_sweep,
            skip_self_test: self.skip_self_test,
            report_ms: ctx.report_ms(self.report_ms),
        })
    }
}

pub fn handle(args: SynArgs, ctx: &Context) -> anyhow::Result<()> {
    let config = args.into_config(ctx)?;
    config.validate().map_err(usage)?;

    let emitter = SynEmitter::new(config, ctx.stop.clone());
    let summary = emitter.run()?;
    ctx.format.print(&summary)?;

    if let Some(err) = &summary.error {
        bail!("syn emitter stopped early: {err}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::UsageError;
    use crate::config::Profile;
    use crate::output::OutputFormat;

    fn args(src_ip: Option<Ipv4Addr>) -> SynArgs {
        SynArgs {
            cidr: "198.51.100.0/30".parse().unwrap(),
            ports: "80,443".parse().unwrap(),
            src_ip,
            src_port: 40000,
            pps: 1000,
            ttl: 64,
            duration: Some(1.0),
            loop_sweep: false,
            skip_self_test: false,
            report_ms: None,
        }
    }

    #[test]
    fn test_source_from_profile() {
        let ctx = Context::new(
            OutputFormat::Text,
            Profile {
                src_ip: Some(Ipv4Addr::new(192, 0, 2, 1)),
                ..Default::default()
            },
        );
        let cfg = args(None).into_config(&ctx).unwrap();
        assert_eq!(cfg.src_ip, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(cfg.sweep_len(), 8);

        let cfg = args(Some(Ipv4Addr::new(192, 0, 2, 9))).into_config(&ctx).unwrap();
        assert_eq!(cfg.src_ip, Ipv4Addr::new(192, 0, 2, 9));
    }

    #[test]
    fn test_missing_source_is_usage_error() {
        let ctx = Context::new(OutputFormat::Text, Profile::default());
        let err = args(None).into_config(&ctx).unwrap_err();
        assert!(err.downcast_ref::<UsageError>().is_some());
    }
}
