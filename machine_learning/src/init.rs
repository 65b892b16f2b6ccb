use comms::specs::BaseWeightsSpec;
use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, Uniform};

use crate::{
    MlErr, Result,
    adapter::{Adapter, AdapterDims},
};

/// A source of parameters.
pub trait ParamGen {
    /// Generates up to `n` parameters.
    ///
    /// # Returns
    /// `None` once the generator is exhausted, otherwise at most `n` parameters.
    fn sample(&mut self, n: usize) -> Option<Vec<f32>>;
}

/// A parameter generator that always generates the same value.
pub struct ConstParamGen {
    value: f32,
    remaining: usize,
}

impl ConstParamGen {
    /// Creates a new `ConstParamGen`.
    ///
    /// # Arguments
    /// * `value` - The value to always generate.
    /// * `limit` - The maximum amount of times to generate that value.
    pub fn new(value: f32, limit: usize) -> Self {
        Self {
            value,
            remaining: limit,
        }
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, mut n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        n = n.min(self.remaining);
        self.remaining -= n;
        Some(vec![self.value; n])
    }
}

/// A parameter generator that follows a probabilistic distribution.
pub struct RandParamGen<'r, R: Rng, D: Distribution<f32>> {
    rng: &'r mut R,
    distribution: D,
    remaining: usize,
}

impl<'r, R: Rng, D: Distribution<f32>> RandParamGen<'r, R, D> {
    /// Creates a new `RandParamGen`.
    ///
    /// # Arguments
    /// * `rng` - A random number generator.
    /// * `distribution` - The distribution to sample from.
    /// * `limit` - The maximum amount of numbers to generate.
    pub fn new(rng: &'r mut R, distribution: D, limit: usize) -> Self {
        Self {
            rng,
            distribution,
            remaining: limit,
        }
    }
}

impl<'r, R: Rng> RandParamGen<'r, R, Uniform<f32>> {
    /// Uniform initialization in `[-sqrt(3 / fan_in), sqrt(3 / fan_in))`.
    ///
    /// # Returns
    /// An error if the calculated range is invalid.
    pub fn lecun_uniform(rng: &'r mut R, limit: usize, fan_in: usize) -> Result<Self> {
        let range = (3. / fan_in as f32).sqrt();
        Ok(Self::new(rng, Uniform::new(-range, range)?, limit))
    }
}

impl<'r, R: Rng> RandParamGen<'r, R, Normal<f32>> {
    /// Normal initialization with zero mean and `sqrt(1 / fan_in)` standard deviation.
    ///
    /// # Returns
    /// An error if the calculated standard deviation is not finite.
    pub fn lecun(rng: &'r mut R, limit: usize, fan_in: usize) -> Result<Self> {
        let std_dev = (1. / fan_in as f32).sqrt();
        Ok(Self::new(rng, Normal::new(0., std_dev)?, limit))
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<'_, R, D> {
    fn sample(&mut self, mut n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        n = n.min(self.remaining);
        self.remaining -= n;

        let sample = (0..n)
            .map(|_| self.distribution.sample(&mut *self.rng))
            .collect();

        Some(sample)
    }
}

fn exactly(param_gen: &mut impl ParamGen, what: &'static str, n: usize) -> Result<Vec<f32>> {
    let params = param_gen.sample(n).unwrap_or_default();

    if params.len() != n {
        return Err(MlErr::ShapeMismatch {
            what,
            got: params.len(),
            expected: n,
        });
    }

    Ok(params)
}

/// Creates a fresh adapter, `A` drawn LeCun-uniform over `rank` and `B` all zeros so
/// the adapter initially contributes nothing to the output.
pub fn init_adapter<R: Rng>(rng: &mut R, dims: AdapterDims) -> Result<Adapter> {
    let a = exactly(
        &mut RandParamGen::lecun_uniform(rng, dims.a_len(), dims.rank())?,
        "adapter A",
        dims.a_len(),
    )?;

    let b = exactly(&mut ConstParamGen::new(0., dims.b_len()), "adapter B", dims.b_len())?;

    debug!(a_len = a.len(), b_len = b.len(); "initialized adapter");
    Adapter::new(dims, a, b)
}

/// Creates an adapter from an optional seed, drawing one from the OS when missing.
pub fn init_adapter_seeded(seed: Option<u64>, dims: AdapterDims) -> Result<Adapter> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    init_adapter(&mut rng, dims)
}

/// Materializes the frozen base weights.
///
/// Seeded weights are LeCun-normal over `input_size`, identical on every node sharing
/// the seed.
pub fn base_weights(spec: &BaseWeightsSpec, dims: AdapterDims) -> Result<Vec<f32>> {
    match spec {
        BaseWeightsSpec::Seeded { seed } => {
            let mut rng = StdRng::seed_from_u64(*seed);
            let mut param_gen = RandParamGen::lecun(&mut rng, dims.base_len(), dims.input())?;
            exactly(&mut param_gen, "base weights", dims.base_len())
        }
        BaseWeightsSpec::Inline { data } => {
            if data.len() != dims.base_len() {
                return Err(MlErr::ShapeMismatch {
                    what: "base weights",
                    got: data.len(),
                    expected: dims.base_len(),
                });
            }

            Ok(data.clone())
        }
    }
}
