use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use treewire::json::parse;
use treewire::rpc::{JsonCodec, RefCache, SendQueue, SendStats};
use treewire::tree::{NodeArena, NodeId, NodeKind};

fn make_source(members: usize) -> String {
    let body = (0..members)
        .map(|i| format!("  \"key{i}\": [{i}, {}, {}]", i + 1, i + 2))
        .collect::<Vec<_>>()
        .join(",\n");
    format!("{{\n{body}\n}}\n")
}

fn send_once(arena: &NodeArena, cache: &mut RefCache, root: NodeId, before: Option<NodeId>) -> u64 {
    let mut stats = SendStats::default();
    let mut sink = |frame: Bytes| {
        black_box(&frame);
    };
    let mut queue = SendQueue::new(arena, cache, &mut stats, &mut sink);
    queue.send_node(&JsonCodec, root, before).unwrap();
    stats.records
}

fn edit_one_member(arena: &mut NodeArena, root: NodeId) -> NodeId {
    let (object, members) = match &arena.get(root).kind {
        NodeKind::Document { value, .. } => match &arena.get(*value).kind {
            NodeKind::Object { members } => (*value, members.clone()),
            other => panic!("unexpected kind: {other:?}"),
        },
        other => panic!("unexpected kind: {other:?}"),
    };
    let target = members.len() / 2;
    let (key, value_prefix) = match &arena.get(members[target].node).kind {
        NodeKind::Member { key, value } => (key.clone(), arena.get(*value).prefix.clone()),
        other => panic!("unexpected kind: {other:?}"),
    };
    let new_value = arena.alloc(
        value_prefix,
        treewire::tree::Markers::EMPTY,
        NodeKind::Literal {
            source: "\"edited\"".into(),
        },
    );
    let new_member = arena.replace_kind(
        members[target].node,
        NodeKind::Member {
            key,
            value: new_value,
        },
    );
    let mut new_members = members;
    new_members[target].node = new_member;
    let new_object = arena.replace_kind(
        object,
        NodeKind::Object {
            members: new_members,
        },
    );
    let (path, eof) = match &arena.get(root).kind {
        NodeKind::Document { path, eof, .. } => (path.clone(), eof.clone()),
        other => panic!("unexpected kind: {other:?}"),
    };
    arena.replace_kind(
        root,
        NodeKind::Document {
            path,
            value: new_object,
            eof,
        },
    )
}

fn bench_initial_send(c: &mut Criterion) {
    let mut group = c.benchmark_group("initial_send");
    for members in [100, 500, 2000].iter() {
        let source = make_source(*members);
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "bench.json", &source).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(members), members, |b, _| {
            b.iter(|| {
                let mut cache = RefCache::new();
                send_once(black_box(&arena), &mut cache, root, None)
            });
        });
    }
    group.finish();
}

fn bench_resend_unchanged(c: &mut Criterion) {
    let mut group = c.benchmark_group("resend_unchanged");
    for members in [100, 500, 2000].iter() {
        let source = make_source(*members);
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "bench.json", &source).unwrap();
        let mut cache = RefCache::new();
        send_once(&arena, &mut cache, root, None);

        group.bench_with_input(BenchmarkId::from_parameter(members), members, |b, _| {
            b.iter(|| send_once(black_box(&arena), &mut cache, root, Some(root)));
        });
    }
    group.finish();
}

fn bench_resend_one_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("resend_one_edit");
    for members in [100, 500, 2000].iter() {
        let source = make_source(*members);
        let mut arena = NodeArena::new();
        let root = parse(&mut arena, "bench.json", &source).unwrap();
        let mut cache = RefCache::new();
        send_once(&arena, &mut cache, root, None);
        let edited = edit_one_member(&mut arena, root);

        group.bench_with_input(BenchmarkId::from_parameter(members), members, |b, _| {
            // The edited tree is already cached after the first iteration,
            // so steady-state iterations measure the diff walk itself.
            b.iter(|| send_once(black_box(&arena), &mut cache, edited, Some(root)));
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for members in [100, 500, 2000].iter() {
        let source = make_source(*members);
        group.bench_with_input(BenchmarkId::from_parameter(members), members, |b, _| {
            b.iter(|| {
                let mut arena = NodeArena::new();
                parse(&mut arena, "bench.json", black_box(&source)).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_initial_send,
    bench_resend_unchanged,
    bench_resend_one_edit,
    bench_parse
);
criterion_main!(benches);
