//! Producer/consumer handoff through a real ring file

use pfs_common::{Ipv4Range, PortList};
use pfs_taskring::task::sweep;
use pfs_taskring::{Consumer, Producer, Proto, Publish, ScanTask, TaskRingGeometry};
use std::collections::HashSet;
use std::thread;

#[test]
fn test_sweep_of_a_slash_24_arrives_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.ring");
    let mut producer = Producer::create(&path, TaskRingGeometry::default()).unwrap();
    let mut consumer = Consumer::open(&path).unwrap();

    let range: Ipv4Range = "192.0.2.0/24".parse().unwrap();
    let ports: PortList = "80".parse().unwrap();
    let all: Vec<ScanTask> = sweep(&range, &ports, Proto::Tcp).collect();
    for batch in all.chunks(64) {
        assert_eq!(producer.publish(batch).unwrap(), Publish::Published);
    }
    assert_eq!(producer.batches(), 4);

    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    while consumer.consume_into(&mut tasks).unwrap() {}
    for t in &tasks {
        assert_eq!(t.port, 80);
        assert_eq!(t.proto, Proto::Tcp);
        assert!(seen.insert(t.addr), "duplicate {t}");
    }
    assert_eq!(tasks.len(), 256);
    assert_eq!(tasks, all);
}

#[test]
fn test_small_ring_fills_and_unblocks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.ring");
    let geom = TaskRingGeometry {
        slots_pow2: 4,
        ..TaskRingGeometry::default()
    };
    let mut producer = Producer::create(&path, geom).unwrap();
    let mut consumer = Consumer::open(&path).unwrap();

    let task = |i: u32| [ScanTask::new(i.into(), 443, Proto::Tcp)];
    for i in 0..15 {
        assert_eq!(producer.publish(&task(i)).unwrap(), Publish::Published);
    }
    assert_eq!(producer.publish(&task(15)).unwrap(), Publish::Full);
    assert_eq!(producer.pending(), 15);

    assert_eq!(consumer.consume().unwrap().unwrap(), task(0));
    assert_eq!(producer.publish(&task(15)).unwrap(), Publish::Published);
}

#[test]
fn test_consumer_started_first_sees_later_batches() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.ring");
    let geom = TaskRingGeometry {
        region_bytes: 1 << 14,
        slots_pow2: 6,
    };
    Producer::create(&path, geom).unwrap();
    let mut consumer = Consumer::open(&path).unwrap();
    assert!(consumer.is_empty());

    let mut reopened = Producer::open(&path).unwrap();
    reopened
        .publish(&[ScanTask::new([10, 0, 0, 1].into(), 22, Proto::Udp)])
        .unwrap();
    let got = consumer.consume().unwrap().unwrap();
    assert_eq!(got[0].to_string(), "10.0.0.1:22/udp");
}

#[test]
fn test_threads_hand_off_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.ring");
    let geom = TaskRingGeometry {
        region_bytes: 1 << 12,
        slots_pow2: 3,
    };
    let mut producer = Producer::create(&path, geom).unwrap();
    let mut consumer = Consumer::open(&path).unwrap();
    const TOTAL: u32 = 5000;

    let writer = thread::spawn(move || {
        let mut next = 0u32;
        while next < TOTAL {
            let n = (next % 17 + 1).min(TOTAL - next);
            let batch: Vec<ScanTask> = (next..next + n)
                .map(|i| ScanTask::new(i.into(), (i % 65536) as u16, Proto::Tcp))
                .collect();
            while producer.publish(&batch).unwrap() == Publish::Full {
                thread::yield_now();
            }
            next += n;
        }
    });

    let mut expected = 0u32;
    while expected < TOTAL {
        let got = consumer
            .consume_with(|t| {
                assert_eq!(u32::from(t.addr), expected);
                expected += 1;
            })
            .unwrap();
        if got.is_none() {
            thread::yield_now();
        }
    }
    writer.join().unwrap();
    assert!(consumer.is_empty());
    assert_eq!(consumer.tasks(), u64::from(TOTAL));
}
