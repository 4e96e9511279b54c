//! Microbenchmarks of the pixel simulator's integration steps

use compute::Simulate;
use compute_pixel::PixelSim;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use data::{
    geometry::{Compartment, Point},
    model::{Model, Reaction},
    parameters::IntegratorOrder,
};
use std::{hint::black_box, sync::Once};

// Make sure env_logger is only initialized once
fn init_logger() {
    static INIT_LOGGER: Once = Once::new();
    INIT_LOGGER.call_once(env_logger::init);
}

/// Gray-Scott model on a square compartment of the given size
fn gray_scott(size: usize, integrator: IntegratorOrder) -> Model {
    let mut model = Model::default();
    let pixels = (0..size)
        .flat_map(|y| (0..size).map(move |x| Point::new(x, y)))
        .collect();
    model
        .add_compartment(Compartment::from_pixels("cell", [size, size], pixels).unwrap())
        .unwrap();
    model.add_parameter("feed", 0.014).unwrap();
    model.add_parameter("kill", 0.054).unwrap();
    let u = model.add_species("U", "cell", 0.1).unwrap();
    u.field.set_uniform_concentration(1.0);
    let v = model.add_species("V", "cell", 0.05).unwrap();
    let seed = (0..size * size)
        .map(|i| if i % 7 == 0 { 0.5 } else { 0.0 })
        .collect();
    v.field.set_concentration(seed).unwrap();
    model
        .add_reaction(
            Reaction::new("conversion", "cell", "U*V^2")
                .with_stoichiometry("U", -1.0)
                .with_stoichiometry("V", 1.0),
        )
        .unwrap();
    model
        .add_reaction(Reaction::new("feed", "cell", "feed*(1 - U)").with_stoichiometry("U", 1.0))
        .unwrap();
    model
        .add_reaction(
            Reaction::new("kill", "cell", "(feed + kill)*V").with_stoichiometry("V", -1.0),
        )
        .unwrap();
    model.options.pixel.integrator = integrator;
    model.options.pixel.max_timestep = 1.0;
    model
}

fn criterion_benchmark(c: &mut Criterion) {
    init_logger();
    for (integrator, multithreaded) in [
        (IntegratorOrder::Rk101, false),
        (IntegratorOrder::Rk212, false),
        (IntegratorOrder::Rk435, false),
        (IntegratorOrder::Rk212, true),
    ] {
        let mut group = c.benchmark_group(format!(
            "compute_pixel::{integrator:?}{}",
            if multithreaded { "::parallel" } else { "" }
        ));
        for size_pow2 in 3..=8 {
            let size = 2usize.pow(size_pow2);
            let num_elems = (size * size) as u64;
            let mut model = gray_scott(size, integrator);
            model.options.pixel.enable_multithreading = multithreaded;
            let mut sim = PixelSim::from_model(&model).unwrap();

            group.throughput(Throughput::Elements(num_elems));
            group.bench_function(BenchmarkId::from_parameter(num_elems), |b| {
                b.iter(|| sim.run(black_box(1.0)).unwrap());
            });
            black_box(sim.concentrations(0));
        }
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
