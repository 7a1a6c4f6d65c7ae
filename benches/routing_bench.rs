use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use fipa_cluster_agents::cluster::WireFrame;
use fipa_cluster_agents::{AclMessage, Aid, MemoryStore, Performative, RegistryEntry, RegistryStore};

fn request() -> AclMessage {
    AclMessage::new(Performative::Request)
        .with_sender(Aid::new("client", "bench").on_node("n1"))
        .with_receiver(Aid::new("server", "bench"))
        .with_conversation("conv-1")
        .with_reply_with("r-1")
        .with_content("ping")
}

fn message_benchmarks(c: &mut Criterion) {
    let msg = request();

    c.bench_function("make_reply", |b| {
        b.iter(|| black_box(&msg).make_reply(Performative::Inform))
    });

    let frame = WireFrame::Deliver {
        message: msg.clone(),
        receivers: msg.receivers().to_vec(),
    };
    c.bench_function("wire_frame_encode", |b| b.iter(|| black_box(&frame).encode()));
}

fn registry_benchmarks(c: &mut Criterion) {
    let store = MemoryStore::new();
    for i in 0..10_000 {
        let _ = store.insert_if_absent(RegistryEntry::new(
            &Aid::new(format!("agent-{i}"), "bench"),
            format!("n{}", i % 4).as_str().into(),
        ));
    }
    let probe = Aid::new("agent-4242", "bench");

    c.bench_function("registry_lookup", |b| b.iter(|| store.get(black_box(&probe))));
}

criterion_group!(benches, message_benchmarks, registry_benchmarks);
criterion_main!(benches);
