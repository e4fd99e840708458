//! `packetfs task-produce` / `packetfs task-consume`

use super::{idle, usage, Context};
use anyhow::Context as _;
use clap::Args;
use crossbeam::utils::Backoff;
use pfs_common::{deadline_after, run_duration, Ipv4Range, PortList, Reporter, Sample};
use pfs_probe::{check_source, ProbeConfig, ProbeStats, Prober, RawIpv4Socket};
use pfs_taskring::task::sweep;
use pfs_taskring::{Consumer, Producer, Proto, Publish, ScanTask, TaskRingGeometry};
use serde::Serialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const DEFAULT_RING_PATH: &str = "/dev/shm/packetfs.taskring";

#[derive(Args, Debug)]
pub struct ProduceArgs {
    /// Ring file
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Destination range
    #[arg(long)]
    pub cidr: Ipv4Range,

    /// Destination ports (comma list, ranges like 22-25)
    #[arg(long, default_value = "80")]
    pub port: PortList,

    /// Protocol: tcp, udp or a number
    #[arg(long, default_value = "tcp")]
    pub proto: Proto,

    /// log2 of the slot count
    #[arg(long, default_value_t = TaskRingGeometry::default().slots_pow2)]
    pub slots_pow2: u8,

    /// Tasks per record
    #[arg(long, default_value_t = 64)]
    pub batch: usize,

    /// Slab size in bytes
    #[arg(long, default_value_t = TaskRingGeometry::default().region_bytes)]
    pub region_bytes: u64,

    /// Report interval in ms (0 disables)
    #[arg(long, env = "REPORT_MS")]
    pub report_ms: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// Ring file
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Expected slab size; a ring of another size is refused
    #[arg(long)]
    pub region_bytes: Option<u64>,

    /// Print each task on stdout
    #[arg(long)]
    pub print: bool,

    /// Exit once the ring is empty instead of waiting for more
    #[arg(long)]
    pub drain: bool,

    /// Seconds to run
    #[arg(long, env = "DURATION")]
    pub duration: Option<f64>,

    /// Send a SYN probe from this address for every TCP task
    #[arg(long)]
    pub syn_src_ip: Option<Ipv4Addr>,

    /// Source port of the probes
    #[arg(long, default_value_t = 40000)]
    pub syn_src_port: u16,

    /// Probes per second (0 = unpaced)
    #[arg(long, default_value_t = 0)]
    pub pps: u64,

    /// Probe TTL
    #[arg(long, default_value_t = 64)]
    pub ttl: u8,

    /// Skip the local-address check of --syn-src-ip
    #[arg(long)]
    pub skip_self_test: bool,

    /// Report interval in ms (0 disables)
    #[arg(long, env = "REPORT_MS")]
    pub report_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ProduceSummary {
    path: PathBuf,
    batches: u64,
    tasks: u64,
    full_waits: u64,
    complete: bool,
    secs: f64,
}

#[derive(Debug, Serialize)]
struct ConsumeSummary {
    path: PathBuf,
    batches: u64,
    tasks: u64,
    probes: Option<u64>,
    skipped: u64,
    secs: f64,
}

fn ring_path(flag: Option<PathBuf>, ctx: &Context) -> PathBuf {
    flag.or_else(|| ctx.profile.task_ring_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_RING_PATH))
}

pub fn produce(args: ProduceArgs, ctx: &Context) -> anyhow::Result<()> {
    let geom = TaskRingGeometry {
        region_bytes: args.region_bytes,
        slots_pow2: args.slots_pow2,
    };
    geom.validate().map_err(usage)?;
    if args.batch == 0 {
        return Err(usage("batch must be at least 1"));
    }
    let path = ring_path(args.path, ctx);
    let mut producer = Producer::create(&path, geom)?;

    info!(
        path = %path.display(),
        cidr = %args.cidr,
        ports = args.port.len(),
        proto = %args.proto,
        batch = args.batch,
        "producing tasks"
    );

    let mut reporter = Reporter::new("task-produce", Duration::from_millis(ctx.report_ms(args.report_ms)));
    let backoff = Backoff::new();
    let mut tasks = sweep(&args.cidr, &args.port, args.proto);
    let mut batch: Vec<ScanTask> = Vec::with_capacity(args.batch);
    let mut full_waits = 0u64;
    let mut complete = true;

    'sweep: loop {
        batch.clear();
        batch.extend(tasks.by_ref().take(args.batch));
        if batch.is_empty() {
            break;
        }
        loop {
            if ctx.stop.is_set() {
                complete = false;
                break 'sweep;
            }
            match producer.publish(&batch)? {
                Publish::Published => {
                    backoff.reset();
                    break;
                }
                Publish::Full => {
                    full_waits += 1;
                    idle(&backoff);
                }
            }
        }
        reporter.poll(Sample {
            pkts: producer.tasks(),
            ring_full: full_waits,
            ..Default::default()
        });
    }

    let report = reporter.finish(Sample {
        pkts: producer.tasks(),
        ring_full: full_waits,
        ..Default::default()
    });
    ctx.format.print(&ProduceSummary {
        path,
        batches: producer.batches(),
        tasks: producer.tasks(),
        full_waits,
        complete,
        secs: report.secs,
    })
}

pub fn consume(args: ConsumeArgs, ctx: &Context) -> anyhow::Result<()> {
    if let Some(secs) = args.duration {
        run_duration(secs).map_err(usage)?;
    }
    let path = ring_path(args.path, ctx);
    let mut consumer = match args.region_bytes {
        Some(n) => Consumer::open_expecting(&path, n)?,
        None => Consumer::open(&path)?,
    };

    let mut prober = match args.syn_src_ip {
        Some(src_ip) => {
            let config = ProbeConfig {
                src_ip,
                src_port: args.syn_src_port,
                pps: args.pps,
                ttl: args.ttl,
                ..Default::default()
            };
            config.validate().map_err(usage)?;
            if !args.skip_self_test {
                check_source(src_ip)?;
            }
            let socket = RawIpv4Socket::open().context("syn worker")?;
            Some(Prober::new(socket, &config, Arc::new(ProbeStats::default()), ctx.stop.clone()))
        }
        None => None,
    };

    info!(path = %path.display(), syn = prober.is_some(), "consuming tasks");

    let mut reporter = Reporter::new("task-consume", Duration::from_millis(ctx.report_ms(args.report_ms)));
    let deadline = args.duration.and_then(deadline_after);
    let backoff = Backoff::new();
    let mut skipped = 0u64;

    while !ctx.stop.is_set() && !deadline.is_some_and(|d| Instant::now() >= d) {
        let mut failure = None;
        let got = consumer.consume_with(|task| {
            if args.print {
                println!("{task}");
            }
            let Some(prober) = prober.as_mut() else {
                return;
            };
            if failure.is_some() {
                return;
            }
            if task.proto != Proto::Tcp {
                skipped += 1;
                return;
            }
            if let Err(e) = prober.probe(task.addr, task.port) {
                failure = Some(e);
            }
        })?;
        if let Some(e) = failure {
            return Err(anyhow::Error::new(e).context("syn worker"));
        }

        match got {
            Some(_) => backoff.reset(),
            None if args.drain => break,
            None => idle(&backoff),
        }
        let probes = prober.as_ref().map_or(0, |p| p.stats().sent);
        reporter.poll(Sample {
            pkts: consumer.tasks(),
            bytes: probes,
            ..Default::default()
        });
    }

    if skipped > 0 {
        warn!(skipped, "non-TCP tasks were not probed");
    }
    let report = reporter.finish(Sample {
        pkts: consumer.tasks(),
        ..Default::default()
    });
    if !args.print {
        ctx.format.print(&ConsumeSummary {
            path,
            batches: consumer.batches(),
            tasks: consumer.tasks(),
            probes: prober.as_ref().map(|p| p.stats().sent),
            skipped,
            secs: report.secs,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::output::OutputFormat;

    fn ctx() -> Context {
        Context::new(
            OutputFormat::Json,
            Profile {
                report_ms: Some(0),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_produce_then_drain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.ring");
        let ctx = ctx();

        produce(
            ProduceArgs {
                path: Some(path.clone()),
                cidr: "192.0.2.0/28".parse().unwrap(),
                port: "80,443".parse().unwrap(),
                proto: Proto::Tcp,
                slots_pow2: 4,
                batch: 8,
                region_bytes: 1 << 16,
                report_ms: None,
            },
            &ctx,
        )
        .unwrap();

        let mut consumer = Consumer::open(&path).unwrap();
        let mut all = Vec::new();
        while consumer.consume_into(&mut all).unwrap() {}
        assert_eq!(all.len(), 32);
        assert_eq!(consumer.batches(), 4);
        assert_eq!(all[1].to_string(), "192.0.2.0:443/tcp");
    }

    #[test]
    fn test_consume_drains_and_exits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.ring");
        let mut producer = Producer::create(&path, TaskRingGeometry::default()).unwrap();
        let batch: Vec<ScanTask> = sweep(&"10.0.0.0/30".parse().unwrap(), &PortList::single(22), Proto::Tcp).collect();
        assert_eq!(producer.publish(&batch).unwrap(), Publish::Published);

        consume(
            ConsumeArgs {
                path: Some(path.clone()),
                region_bytes: Some(TaskRingGeometry::default().region_bytes),
                print: false,
                drain: true,
                duration: Some(5.0),
                syn_src_ip: None,
                syn_src_port: 40000,
                pps: 0,
                ttl: 64,
                skip_self_test: false,
                report_ms: None,
            },
            &ctx(),
        )
        .unwrap();
        assert_eq!(producer.pending(), 0);
    }

    #[test]
    fn test_unbounded_duration_is_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = consume(
            ConsumeArgs {
                path: Some(dir.path().join("missing.ring")),
                region_bytes: None,
                print: false,
                drain: true,
                duration: Some(f64::INFINITY),
                syn_src_ip: None,
                syn_src_port: 40000,
                pps: 0,
                ttl: 64,
                skip_self_test: false,
                report_ms: None,
            },
            &ctx(),
        )
        .unwrap_err();
        assert!(err.downcast_ref::<super::super::UsageError>().is_some());
    }

    #[test]
    fn test_bad_geometry_is_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = produce(
            ProduceArgs {
                path: Some(dir.path().join("tasks.ring")),
                cidr: "192.0.2.0/30".parse().unwrap(),
                port: PortList::single(80),
                proto: Proto::Tcp,
                slots_pow2: 0,
                batch: 8,
                region_bytes: 1 << 16,
                report_ms: None,
            },
            &ctx(),
        )
        .unwrap_err();
        assert!(err.downcast_ref::<super::super::UsageError>().is_some());
    }
}
