use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use dpgraph_core::config::PrivacyConfig;
use dpgraph_core::id::{DataSubject, PartyId};
use dpgraph_core::tensor::{ReduceKind, Tensor};
use dpgraph_dp::{InMemoryLedger, PublishEngine, PublishRequest, SensitivityEstimator};
use dpgraph_lazy::{BinaryOp, LazyNode, ReduceOp};
use dpgraph_remote::{Client, Party, RemoteOp, VirtualNetwork};

fn make_leaf(len: usize, subject: &str) -> LazyNode {
    let data = (0..len).map(|i| (i % 10) as f64).collect();
    let t = Tensor::new([len], data).unwrap();
    LazyNode::leaf_in_range(t, 0.0, 10.0, DataSubject::from(subject)).unwrap()
}

fn make_graph(len: usize) -> LazyNode {
    let a = make_leaf(len, "alice");
    let b = make_leaf(len, "bob");
    a.add(&b)
        .unwrap()
        .mul(0.5)
        .unwrap()
        .sub(1.0)
        .unwrap()
        .sum(None, false)
        .unwrap()
}

fn bench_lazy_replay(c: &mut Criterion) {
    let node = make_graph(4096);
    c.bench_function("lazy_build", |b| b.iter(|| make_graph(4096)));
    c.bench_function("lazy_replay", |b| {
        b.iter(|| {
            let _ = node.reconstruct(node.sources()).unwrap();
        })
    });
}

fn bench_sensitivity(c: &mut Criterion) {
    let a = make_leaf(6, "alice");
    let node = a.pow_scalar(2.0).unwrap().sum(None, false).unwrap();
    let estimator = SensitivityEstimator::new(&PrivacyConfig::default().with_seed(7));
    c.bench_function("sensitivity_search", |b| {
        b.iter(|| {
            let _ = estimator.estimate(&node).unwrap();
        })
    });
}

fn bench_publish(c: &mut Criterion) {
    let node = make_graph(1024);
    let engine = PublishEngine::new(PrivacyConfig::default().with_seed(7)).unwrap();
    let ledger = InMemoryLedger::with_default(f64::INFINITY);
    c.bench_function("publish_linear", |b| {
        b.iter(|| {
            let _ = engine
                .publish(&node, &ledger, PublishRequest::for_node(&node, 1.0))
                .unwrap();
        })
    });
}

fn bench_remote_dispatch(c: &mut Criterion) {
    let net = Arc::new(VirtualNetwork::new());
    net.add_party(Arc::new(Party::new("bob"))).unwrap();
    let client = Client::new("analyst", net.clone());
    let x = client
        .send(&PartyId::from("bob"), make_leaf(256, "alice"))
        .unwrap();
    let total = RemoteOp::Reduce(ReduceOp::new(ReduceKind::Sum, None, false));
    c.bench_function("remote_dispatch", |b| {
        b.iter(|| {
            let _ = client
                .apply(RemoteOp::Binary(BinaryOp::Mul), &x, Some(2.0.into()))
                .unwrap();
            let _ = client.apply(total.clone(), &x, None).unwrap();
            client.sync().unwrap();
        })
    });
}

criterion_group!(
    graphs,
    bench_lazy_replay,
    bench_sensitivity,
    bench_publish,
    bench_remote_dispatch
);
criterion_main!(graphs);
