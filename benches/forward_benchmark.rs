use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use conv_qnet::{Architecture, ComputeTarget, NetworkConfigBuilder, build_q_network};
use ndarray::Array4;

fn bench_forward(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_4x84x84");
    group.sample_size(10);

    for architecture in [Architecture::Standard, Architecture::Dueling] {
        for target in [ComputeTarget::Cpu, ComputeTarget::Accelerator] {
            let config = NetworkConfigBuilder::new()
                .architecture(architecture)
                .input_dim(&[4, 84, 84])
                .output_dim(6)
                .compute_target(target)
                .seed(0)
                .build()
                .unwrap();
            let network = build_q_network(&config).unwrap();

            for &batch in &[1usize, 32] {
                let states = Array4::<f32>::zeros((batch, 4, 84, 84));
                let id = BenchmarkId::new(format!("{:?}/{}", architecture, target), batch);
                group.bench_with_input(id, &states, |b, states| {
                    b.iter(|| network.forward(black_box(states.view())).unwrap())
                });
            }
        }
    }

    group.finish();
}

fn bench_construction(c: &mut Criterion) {
    c.bench_function("construct_standard_4x84x84", |b| {
        b.iter(|| {
            let config = NetworkConfigBuilder::new()
                .input_dim(&[4, 84, 84])
                .output_dim(black_box(6))
                .compute_target(ComputeTarget::Cpu)
                .build()
                .unwrap();
            build_q_network(&config).unwrap()
        })
    });
}

criterion_group!(benches, bench_forward, bench_construction);
criterion_main!(benches);
