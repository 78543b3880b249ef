//! Integration tests for Perfect Links over the simulated network.
//!
//! Every node is `simulator endpoint → perfect_links`.  All tests run on a
//! paused tokio clock, so retransmission timeouts elapse instantly and the
//! outcome does not depend on machine speed.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use linkstack::config::{Membership, Process};
use linkstack::packet::Packet;
use linkstack::perfect_link::perfect_links;
use linkstack::simulator::{Simulator, SimulatorConfig};
use linkstack::socket::Socket;
use linkstack::timer::RetransmitPolicy;

const RTO: Duration = Duration::from_millis(100);
const TICK: Duration = Duration::from_millis(10);

fn addr(id: u32) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, id as u8], 5000))
}

fn membership(n: u32) -> Arc<Membership> {
    Arc::new(Membership::new((1..=n).map(|id| Process::new(id, addr(id)))).unwrap())
}

fn node(sim: &Simulator, members: &Arc<Membership>, id: u32) -> Socket<Packet> {
    sim.endpoint(addr(id))
        .stack_with(perfect_links(members.clone(), RetransmitPolicy::Fixed(RTO)), TICK)
}

async fn next(socket: &mut Socket<Packet>) -> Packet {
    tokio::time::timeout(Duration::from_secs(60), socket.recv())
        .await
        .expect("timed out")
        .expect("socket closed")
}

async fn assert_silent(socket: &mut Socket<Packet>) {
    let waited = tokio::time::timeout(Duration::from_secs(5), socket.recv()).await;
    assert!(waited.is_err(), "unexpected delivery: {:?}", waited);
}

// ---------------------------------------------------------------------------
// Retransmission liveness
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn delivery_survives_dropped_attempts() {
    const DROPPED: u64 = 3;

    let sim = Simulator::reliable();
    let members = membership(2);
    let p1 = node(&sim, &members, 1);
    let mut p2 = node(&sim, &members, 2);
    sim.drop_next(addr(1), addr(2), DROPPED);

    p1.send(Packet::new(addr(2), 1, b"hello".to_vec())).unwrap();

    let got = next(&mut p2).await;
    assert_eq!(got.peer(), addr(1));
    assert_eq!(got.seq(), 1);
    assert_eq!(got.payload(), b"hello");
    assert_silent(&mut p2).await;

    let link = sim.stats(addr(1), addr(2));
    assert_eq!(link.data_sent, DROPPED + 1);
    assert_eq!(link.data_delivered, 1);
    assert_eq!(sim.stats(addr(2), addr(1)).acks_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn lost_acks_trigger_resends_but_not_redelivery() {
    let sim = Simulator::reliable();
    let members = membership(2);
    let p1 = node(&sim, &members, 1);
    let mut p2 = node(&sim, &members, 2);
    sim.drop_next_acks(addr(2), addr(1), 2);

    p1.send(Packet::new(addr(2), 7, Vec::new())).unwrap();
    assert_eq!(next(&mut p2).await.seq(), 7);
    assert_silent(&mut p2).await;

    let link = sim.stats(addr(1), addr(2));
    assert_eq!(link.data_sent, 3);
    assert_eq!(link.data_delivered, 3);
    assert_eq!(sim.stats(addr(2), addr(1)).acks_sent, 3);
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn duplicated_packets_are_delivered_once() {
    let sim = Simulator::new(SimulatorConfig {
        duplicate_rate: 1.0,
        ..Default::default()
    });
    let members = membership(2);
    let p1 = node(&sim, &members, 1);
    let mut p2 = node(&sim, &members, 2);

    for seq in 1..=5 {
        p1.send(Packet::new(addr(2), seq, Vec::new())).unwrap();
    }
    let mut seen = Vec::new();
    for _ in 1..=5 {
        seen.push(next(&mut p2).await.seq());
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);
    assert_silent(&mut p2).await;
    assert_eq!(sim.stats(addr(1), addr(2)).data_delivered, 10);
}

#[tokio::test(start_paused = true)]
async fn lossy_network_delivers_everything_exactly_once() {
    const COUNT: i64 = 20;

    let sim = Simulator::new(SimulatorConfig {
        loss_rate: 0.5,
        duplicate_rate: 0.2,
        seed: 7,
    });
    let members = membership(2);
    let p1 = node(&sim, &members, 1);
    let mut p2 = node(&sim, &members, 2);

    for seq in 1..=COUNT {
        p1.send(Packet::new(addr(2), seq, seq.to_be_bytes().to_vec()))
            .unwrap();
    }

    let mut delivered: BTreeMap<i64, usize> = BTreeMap::new();
    while delivered.len() < COUNT as usize {
        let pkt = next(&mut p2).await;
        assert_eq!(pkt.payload(), pkt.seq().to_be_bytes());
        *delivered.entry(pkt.seq()).or_default() += 1;
    }
    assert_silent(&mut p2).await;
    assert!(delivered.values().all(|&n| n == 1), "{delivered:?}");
}

// ---------------------------------------------------------------------------
// Acknowledgement idempotence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn repeated_acks_have_no_effect() {
    let sim = Simulator::reliable();
    let members = membership(2);
    let mut p1 = node(&sim, &members, 1);
    let mut p2 = node(&sim, &members, 2);

    p1.send(Packet::new(addr(2), 3, Vec::new())).unwrap();
    assert_eq!(next(&mut p2).await.seq(), 3);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let before = sim.stats(addr(1), addr(2));

    // Take over node 2's address and replay its ack.
    let raw = sim.endpoint(addr(2));
    for _ in 0..3 {
        raw.send(Packet::new(addr(1), -3, Vec::new())).unwrap();
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(sim.stats(addr(1), addr(2)), before);
    assert_silent(&mut p1).await;
}

// ---------------------------------------------------------------------------
// Grouping isolation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silent_peer_does_not_block_the_others() {
    let sim = Simulator::reliable();
    let members = membership(3);
    let p1 = node(&sim, &members, 1);
    let mut p2 = node(&sim, &members, 2);
    let mut p3 = node(&sim, &members, 3);
    sim.isolate(addr(3));

    p1.send(Packet::new(addr(3), 1, Vec::new())).unwrap();
    for seq in 1..=3 {
        p1.send(Packet::new(addr(2), seq, Vec::new())).unwrap();
    }
    for seq in 1..=3 {
        assert_eq!(next(&mut p2).await.seq(), seq);
    }
    assert_eq!(sim.stats(addr(1), addr(2)).data_sent, 3);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sim.stats(addr(1), addr(3)).data_sent >= 5);
    assert_eq!(sim.stats(addr(1), addr(2)).data_sent, 3);
    assert_silent(&mut p3).await;
}

#[tokio::test(start_paused = true)]
async fn invalid_send_is_dropped_and_the_link_keeps_working() {
    let sim = Simulator::reliable();
    let members = membership(2);
    let mut p1 = node(&sim, &members, 1);
    let mut p2 = node(&sim, &members, 2);

    p1.send(Packet::new(addr(2), 0, Vec::new())).unwrap();
    p1.send(Packet::new(addr(2), 1, Vec::new())).unwrap();
    p2.send(Packet::new(addr(1), 1, Vec::new())).unwrap();

    let at_p2 = next(&mut p2).await;
    assert_eq!((at_p2.peer(), at_p2.seq()), (addr(1), 1));
    let at_p1 = next(&mut p1).await;
    assert_eq!((at_p1.peer(), at_p1.seq()), (addr(2), 1));
    assert_silent(&mut p2).await;
    assert_eq!(sim.stats(addr(1), addr(2)).data_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn packets_for_strangers_are_dropped() {
    let sim = Simulator::reliable();
    let members = membership(2);
    let p1 = node(&sim, &members, 1);
    let mut p2 = node(&sim, &members, 2);
    let stranger = SocketAddr::from(([10, 0, 0, 9], 5000));

    p1.send(Packet::new(stranger, 1, Vec::new())).unwrap();
    p1.send(Packet::new(addr(2), 1, Vec::new())).unwrap();

    assert_eq!(next(&mut p2).await.seq(), 1);
    assert_eq!(sim.stats(addr(1), stranger).data_sent, 0);
}
