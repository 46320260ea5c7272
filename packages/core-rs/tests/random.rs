use gpumat_core::{Engine, EngineConfig, ErrorKind};
use ndarray::Array2;

fn seeded(seed: u32) -> Engine {
    let config = EngineConfig::default().with_max_ones(16).with_rng_streams(64);
    let mut engine = Engine::new(config).expect("engine");
    engine.init_random(seed).expect("seed");
    engine
}

#[test]
fn sampling_before_seeding_fails() {
    let mut engine = Engine::new(EngineConfig::default().with_max_ones(16)).expect("engine");
    let err = engine.rng().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RngNotInitialized);
    assert_eq!(err.code(), -13);
}

#[test]
fn reseeding_is_rejected() {
    let mut engine = seeded(1);
    assert_eq!(
        engine.init_random(2).unwrap_err().kind(),
        ErrorKind::UnsupportedOperation
    );
    assert_eq!(engine.rng().expect("rng").seed(), 1);
    assert_eq!(engine.rng().expect("rng").streams(), 64);
}

#[test]
fn same_seed_reproduces_matrix() {
    let mut first = seeded(42);
    let mut second = seeded(42);
    let mut a = first.zeros(10, 20).expect("alloc");
    let mut b = second.zeros(10, 20).expect("alloc");
    a.fill_with_rand(first.rng().expect("rng")).expect("rand");
    b.fill_with_rand(second.rng().expect("rng")).expect("rand");
    assert_eq!(a.to_vec().expect("download"), b.to_vec().expect("download"));

    let mut other = seeded(43);
    let mut c = other.zeros(10, 20).expect("alloc");
    c.fill_with_rand(other.rng().expect("rng")).expect("rand");
    assert_ne!(a.to_vec().expect("download"), c.to_vec().expect("download"));
}

#[test]
fn uniforms_lie_in_unit_interval() {
    let mut engine = seeded(7);
    let mut a = engine.zeros(50, 40).expect("alloc");
    a.fill_with_rand(engine.rng().expect("rng")).expect("rand");
    let values = a.to_vec().expect("download");
    assert!(values.iter().all(|&u| u > 0.0 && u <= 1.0));
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    assert!((mean - 0.5).abs() < 0.05, "mean {mean}");
}

#[test]
fn normals_have_unit_scale() {
    let mut engine = seeded(11);
    let mut a = engine.zeros(100, 50).expect("alloc");
    a.fill_with_randn(engine.rng().expect("rng")).expect("randn");
    let values = a.to_vec().expect("download");
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
    assert!(mean.abs() < 0.1, "mean {mean}");
    assert!((var - 1.0).abs() < 0.15, "variance {var}");
}

#[test]
fn gaussian_noise_with_zero_scale_is_identity() {
    let mut engine = seeded(3);
    let mut a = engine.from_host(vec![1.0, 2.0, 3.0, 4.0], 2, 2).expect("upload");
    let mut out = engine.zeros(2, 2).expect("alloc");
    a.sample_gaussian(engine.rng().expect("rng"), 0.0, Some(&mut out))
        .expect("gaussian");
    assert_eq!(out.to_vec().expect("download"), vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn bernoulli_draws_are_binary() {
    let mut engine = seeded(5);
    let mut p = engine.from_host(vec![0.0, 1.0, 0.5, 0.5], 2, 2).expect("upload");
    p.sample_bernoulli(engine.rng().expect("rng"), None).expect("bernoulli");
    let draws = p.to_vec().expect("download");
    assert_eq!(draws[0], 0.0);
    assert_eq!(draws[1], 1.0);
    assert!(draws.iter().all(|&d| d == 0.0 || d == 1.0));

    let mut m = engine.from_host(vec![-1.0, 1.0, 0.0], 3, 1).expect("upload");
    m.sample_bernoulli_tanh(engine.rng().expect("rng"), None).expect("tanh");
    let draws = m.to_vec().expect("download");
    assert_eq!(draws[0], -1.0);
    assert_eq!(draws[1], 1.0);
    assert!(draws[2] == -1.0 || draws[2] == 1.0);
}

#[test]
fn dropout_extremes() {
    let mut engine = seeded(9);
    let data: Vec<f32> = (0..30).map(|i| i as f32).collect();

    let mut keep = engine.from_host(data.clone(), 5, 6).expect("upload");
    keep.dropout(engine.rng().expect("rng"), 0.0, -1.0, 2.0).expect("dropout");
    let kept = keep.to_vec().expect("download");
    assert_eq!(kept, data.iter().map(|x| x * 2.0).collect::<Vec<_>>());

    let mut drop = engine.from_host(data, 5, 6).expect("upload");
    drop.dropout(engine.rng().expect("rng"), 1.0, -1.0, 2.0).expect("dropout");
    assert_eq!(
        drop.to_array().expect("download"),
        Array2::from_elem((5, 6), -1.0)
    );
}

#[test]
fn softmax_perturbations_stay_finite() {
    let mut engine = seeded(13);
    let mut energies = engine.from_host(vec![0.0; 12], 4, 3).expect("upload");
    let mut out = engine.zeros(4, 3).expect("alloc");
    energies
        .perturb_energy_for_softmax_sampling(engine.rng().expect("rng"), Some(&mut out))
        .expect("energy");
    assert!(out.to_vec().expect("download").iter().all(|x| !x.is_nan()));

    let mut probs = engine.from_host(vec![0.25; 12], 4, 3).expect("upload");
    probs
        .perturb_prob_for_softmax_sampling(engine.rng().expect("rng"), None)
        .expect("prob");
    assert!(probs.to_vec().expect("download").iter().all(|&x| x > 0.0));
}
