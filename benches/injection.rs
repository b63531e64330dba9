//! Benchmark suite for injection and kernel comparison
//!
//! Measures the injection pass itself and reference-vs-fused forward
//! latency on small transformer shapes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use inyectar::graph::{Block, ModelGraph, Module};
use inyectar::inject::policy::{FlashAttentionPolicy, FusedLayerNormPolicy, FusedSoftmaxPolicy};
use inyectar::inject::Injector;
use inyectar::modules::{AttentionKernel, FlashSelfAttention, SelfAttention};
use inyectar::Tensor;

const D_MODEL: usize = 64;
const NUM_HEADS: usize = 8;

fn create_test_graph(num_layers: usize) -> ModelGraph {
    let mut graph = ModelGraph::new(Box::new(Block));
    let root = graph.root();
    for layer in 0..num_layers {
        let block = graph
            .add_child(root, &format!("layer{layer}"), Box::new(Block))
            .unwrap();
        graph
            .add_child(
                block,
                "attn",
                Box::new(SelfAttention::new(D_MODEL, NUM_HEADS, true).unwrap()),
            )
            .unwrap();
        graph
            .add_child(
                block,
                "norm",
                Box::new(inyectar::modules::LayerNorm::new(D_MODEL, 1e-5).unwrap()),
            )
            .unwrap();
    }
    graph
}

fn create_input(seq_len: usize) -> Tensor {
    let data: Vec<f32> = (0..seq_len * D_MODEL)
        .map(|i| ((i as f32) * 0.13).sin() * 0.5)
        .collect();
    Tensor::from_vec(vec![seq_len, D_MODEL], data).unwrap()
}

fn benchmark_injection_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("injection_pass");

    for num_layers in [1, 4, 12].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(num_layers),
            num_layers,
            |b, &num_layers| {
                b.iter_batched(
                    || create_test_graph(num_layers),
                    |mut graph| {
                        let injector = Injector::new()
                            .with_policy(FlashAttentionPolicy)
                            .with_policy(FusedLayerNormPolicy)
                            .with_policy(FusedSoftmaxPolicy);
                        let report = injector.inject(&mut graph).unwrap();
                        black_box(report)
                    },
                    criterion::BatchSize::SmallInput,
                );
            },
        );
    }

    group.finish();
}

fn benchmark_attention_forward(c: &mut Criterion) {
    let reference = SelfAttention::new(D_MODEL, NUM_HEADS, true).unwrap();
    let flash = FlashSelfAttention::new(D_MODEL, NUM_HEADS, true, AttentionKernel::Flash).unwrap();
    let tiled = FlashSelfAttention::new(D_MODEL, NUM_HEADS, true, AttentionKernel::Tiled).unwrap();

    let mut group = c.benchmark_group("attention_forward");

    for seq_len in [32, 128, 256].iter() {
        let input = create_input(*seq_len);

        group.bench_with_input(
            BenchmarkId::new("reference", seq_len),
            &input,
            |b, input| {
                b.iter(|| reference.forward(black_box(input)).unwrap());
            },
        );
        group.bench_with_input(BenchmarkId::new("flash", seq_len), &input, |b, input| {
            b.iter(|| flash.forward(black_box(input)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("tiled", seq_len), &input, |b, input| {
            b.iter(|| tiled.forward(black_box(input)).unwrap());
        });
    }

    group.finish();
}

fn benchmark_injected_vs_reference(c: &mut Criterion) {
    let mut graph = create_test_graph(1);
    let attn_node = graph.lookup("layer0.attn").unwrap();
    let input = create_input(128);

    let mut group = c.benchmark_group("injected_forward");

    group.bench_function("before_injection", |b| {
        let module = graph.module(attn_node).unwrap();
        b.iter(|| module.forward(black_box(&input)).unwrap());
    });

    Injector::new()
        .with_policy(FlashAttentionPolicy)
        .with_policy(FusedLayerNormPolicy)
        .inject(&mut graph)
        .unwrap();

    group.bench_function("after_injection", |b| {
        let module = graph.module(attn_node).unwrap();
        b.iter(|| module.forward(black_box(&input)).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_injection_pass,
    benchmark_attention_forward,
    benchmark_injected_vs_reference
);
criterion_main!(benches);
