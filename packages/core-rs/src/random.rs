//! Parallel multiply-with-carry generator and the sampling kernels that
//! consume it. Element `i` of a matrix always draws from stream
//! `i % streams`, so a given seed reproduces the same matrix regardless of
//! how the host kernel is scheduled.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::MatResult;
use crate::kernels;
use crate::matrix::DenseMatrix;

const MULTIPLIER_SEED: u64 = 0x6d77_635f_6d75_6c74;
const WARMUP_STEPS: usize = 100;
const TWO_POW_32: f64 = 4_294_967_296.0;

#[derive(Clone, Debug)]
struct MwcStream {
    mult: u32,
    word: u64,
}

impl MwcStream {
    fn step(&mut self) -> u32 {
        self.word = u64::from(self.mult) * (self.word & 0xffff_ffff) + (self.word >> 32);
        self.word as u32
    }

    /// Uniform draw in `(0, 1]`.
    fn uniform(&mut self) -> f32 {
        ((f64::from(self.step()) + 1.0) / TWO_POW_32) as f32
    }

    fn normal_pair(&mut self) -> (f32, f32) {
        let u1 = self.uniform();
        let u2 = self.uniform();
        let radius = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * std::f32::consts::PI * u2;
        (radius * theta.cos(), radius * theta.sin())
    }
}

/// Seeded pool of independent generator streams.
#[derive(Debug)]
pub struct RandomStreamPool {
    seed: u32,
    streams: Vec<MwcStream>,
}

impl RandomStreamPool {
    pub(crate) fn seeded(seed: u32, streams: usize) -> Self {
        let mut multipliers = ChaCha8Rng::seed_from_u64(MULTIPLIER_SEED);
        let streams = (0..streams.max(1))
            .map(|_| {
                let mut stream = MwcStream {
                    mult: multipliers.gen_range((1u32 << 31)..=u32::MAX),
                    word: (u64::from(seed) << 32) + 1,
                };
                for _ in 0..WARMUP_STEPS {
                    stream.step();
                }
                stream
            })
            .collect();
        Self { seed, streams }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn streams(&self) -> usize {
        self.streams.len()
    }

    /// Runs `draw` on every stream, then interleaves the per-stream output
    /// so that element `i` comes from stream `i % streams`.
    fn generate<F>(&mut self, len: usize, draw: F) -> Vec<f32>
    where
        F: Fn(&mut MwcStream, usize) -> Vec<f32> + Send + Sync,
    {
        let count = self.streams.len();
        let per_stream = |s: usize| if s < len { (len - s).div_ceil(count) } else { 0 };
        let draws: Vec<Vec<f32>>;
        #[cfg(feature = "parallel")]
        {
            if crate::threading::should_parallelize(len) {
                crate::threading::ensure_rayon_pool();
                draws = self
                    .streams
                    .par_iter_mut()
                    .enumerate()
                    .map(|(s, stream)| draw(stream, per_stream(s)))
                    .collect();
            } else {
                draws = self
                    .streams
                    .iter_mut()
                    .enumerate()
                    .map(|(s, stream)| draw(stream, per_stream(s)))
                    .collect();
            }
        }
        #[cfg(not(feature = "parallel"))]
        {
            draws = self
                .streams
                .iter_mut()
                .enumerate()
                .map(|(s, stream)| draw(stream, per_stream(s)))
                .collect();
        }
        let mut out = vec![0.0f32; len];
        for (s, values) in draws.into_iter().enumerate() {
            for (k, v) in values.into_iter().enumerate() {
                out[s + k * count] = v;
            }
        }
        out
    }

    pub fn uniforms(&mut self, len: usize) -> Vec<f32> {
        self.generate(len, |stream, n| (0..n).map(|_| stream.uniform()).collect())
    }

    /// Standard normals from Box-Muller pairs; both halves of a pair land
    /// on consecutive positions of the same stream.
    pub fn normals(&mut self, len: usize) -> Vec<f32> {
        self.generate(len, |stream, n| {
            let mut out = Vec::with_capacity(n + 1);
            while out.len() < n {
                let (z0, z1) = stream.normal_pair();
                out.push(z0);
                out.push(z1);
            }
            out.truncate(n);
            out
        })
    }
}

impl DenseMatrix {
    fn sample_with<F>(
        &mut self,
        noise: Vec<f32>,
        target: Option<&mut DenseMatrix>,
        f: F,
    ) -> MatResult<()>
    where
        F: Fn(f32, f32) -> f32 + Send + Sync,
    {
        let mut values = self.device_values()?;
        kernels::zip_in_place(&mut values, &noise, f);
        self.commit(target, &values)
    }

    /// Fills with uniform draws in `(0, 1]`.
    pub fn fill_with_rand(&mut self, rng: &mut RandomStreamPool) -> MatResult<()> {
        self.ensure_on_device()?;
        let values = rng.uniforms(self.len());
        self.store_values(&values)
    }

    /// Fills with standard normal draws.
    pub fn fill_with_randn(&mut self, rng: &mut RandomStreamPool) -> MatResult<()> {
        self.ensure_on_device()?;
        let values = rng.normals(self.len());
        self.store_values(&values)
    }

    /// Adds zero-mean gaussian noise with standard deviation `mult`.
    pub fn sample_gaussian(
        &mut self,
        rng: &mut RandomStreamPool,
        mult: f32,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let noise = rng.normals(self.len());
        self.sample_with(noise, target, |x, z| x + mult * z)
    }

    /// Replaces each probability with a `{0, 1}` draw (`1` when `u < p`).
    /// Uniforms include 1.0, so `p = 1` can still yield 0 on that draw.
    pub fn sample_bernoulli(&mut self, rng: &mut RandomStreamPool, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let noise = rng.uniforms(self.len());
        self.sample_with(noise, target, |p, u| if u < p { 1.0 } else { 0.0 })
    }

    /// Treats each element as a mean in `[-1, 1]` and draws `{-1, 1}`.
    pub fn sample_bernoulli_tanh(
        &mut self,
        rng: &mut RandomStreamPool,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let noise = rng.uniforms(self.len());
        self.sample_with(noise, target, |x, u| if u < (1.0 + x) / 2.0 { 1.0 } else { -1.0 })
    }

    /// Each element is replaced by `val` with probability `drop_prob` and
    /// otherwise multiplied by `scale`.
    pub fn dropout(&mut self, rng: &mut RandomStreamPool, drop_prob: f32, val: f32, scale: f32) -> MatResult<()> {
        self.ensure_on_device()?;
        let noise = rng.uniforms(self.len());
        self.sample_with(noise, None, |x, u| if u > drop_prob { x * scale } else { val })
    }

    /// Adds Gumbel noise `-ln(-ln u)` to energies.
    pub fn perturb_energy_for_softmax_sampling(
        &mut self,
        rng: &mut RandomStreamPool,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let noise = rng.uniforms(self.len());
        self.sample_with(noise, target, |x, u| x - (-u.ln()).ln())
    }

    /// Divides probabilities by `-ln u`.
    pub fn perturb_prob_for_softmax_sampling(
        &mut self,
        rng: &mut RandomStreamPool,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let noise = rng.uniforms(self.len());
        self.sample_with(noise, target, |x, u| x / -u.ln())
    }
}
