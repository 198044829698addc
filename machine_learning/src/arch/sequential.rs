use ndarray::ArrayD;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{Model, ParamEntry, layers::Layer};
use crate::{MlErr, Result};

/// A sequential model: information flows forward when computing an output and backward when
/// computing the *deltas* of its layers.
///
/// The parameters are not owned by the model, every layer reads its own contiguous slice of the
/// flat parameter buffer handed to `forward` and `backward`, in layer order.
#[derive(Clone)]
pub struct Sequential {
    layers: Vec<(String, Layer)>,
    training: bool,
    rng: StdRng,
}

impl Sequential {
    /// Creates a new `Sequential`, naming each layer after its position.
    ///
    /// # Arguments
    /// * `layers` - The layers the sequential is composed of.
    ///
    /// # Returns
    /// A new `Sequential` instance.
    pub fn new<I>(layers: I) -> Self
    where
        I: IntoIterator<Item = Layer>,
    {
        Self::from_named(
            layers
                .into_iter()
                .enumerate()
                .map(|(i, layer)| (i.to_string(), layer)),
        )
    }

    /// Creates a new `Sequential` out of named layers.
    ///
    /// # Arguments
    /// * `layers` - `(name, layer)` pairs, the name prefixes the layer's parameters in
    ///   `param_layout`.
    ///
    /// # Returns
    /// A new `Sequential` instance, in training mode.
    pub fn from_named<I, S>(layers: I) -> Self
    where
        I: IntoIterator<Item = (S, Layer)>,
        S: Into<String>,
    {
        Self {
            layers: layers
                .into_iter()
                .map(|(name, layer)| (name.into(), layer))
                .collect(),
            training: true,
            rng: StdRng::seed_from_u64(0),
        }
    }

    /// Reseeds the generator used for dropout masks.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Checks `params` has exactly as many elements as this model.
    fn check_len(&self, what: &'static str, got: usize) -> Result<()> {
        let expected = self.size();
        if got != expected {
            return Err(MlErr::SizeMismatch {
                what,
                got,
                expected,
            });
        }

        Ok(())
    }
}

impl Model for Sequential {
    fn size(&self) -> usize {
        self.layers.iter().map(|(_, layer)| layer.size()).sum()
    }

    fn init_params<R: Rng>(&self, rng: &mut R) -> Result<Vec<f32>> {
        let mut params = Vec::with_capacity(self.size());
        for (_, layer) in &self.layers {
            params.extend(layer.init_params(rng)?);
        }

        Ok(params)
    }

    fn param_layout(&self) -> Vec<ParamEntry> {
        let mut offset = 0;
        let mut layout = Vec::new();

        for (name, layer) in &self.layers {
            for (param, shape) in layer.param_shapes() {
                let len: usize = shape.iter().product();
                layout.push(ParamEntry {
                    name: format!("{name}.{param}"),
                    shape,
                    range: offset..offset + len,
                });
                offset += len;
            }
        }

        layout
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn forward(&mut self, params: &[f32], mut x: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.check_len("model parameters", params.len())?;

        let Self {
            layers,
            training,
            rng,
        } = self;

        let mut rest = params;
        for (_, layer) in layers.iter_mut() {
            let (own, tail) = rest.split_at(layer.size());
            x = layer.forward(own, x, *training, rng)?;
            rest = tail;
        }

        Ok(x)
    }

    fn backward(&mut self, params: &[f32], grad: &mut [f32], mut d: ArrayD<f32>) -> Result<ArrayD<f32>> {
        self.check_len("model parameters", params.len())?;
        self.check_len("model gradient", grad.len())?;

        let mut end = params.len();
        for (_, layer) in self.layers.iter_mut().rev() {
            let start = end - layer.size();
            d = layer.backward(&params[start..end], &mut grad[start..end], d)?;
            end = start;
        }

        Ok(d)
    }
}
