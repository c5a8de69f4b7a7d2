//! Dense graph attention over an adjacency matrix.
//!
//! Single-head attention layer for batched dense graphs: every memory slot
//! attends over its adjacency-connected neighbors. Disconnected pairs are
//! masked out of the softmax with a large negative logit.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{leaky_relu, softmax};

/// Additive mask value for disconnected slot pairs.
const MASK_VALUE: f64 = -1e9;

/// Dense graph-attention layer configuration.
#[derive(Config, Debug)]
pub struct GraphAttentionConfig {
    /// Input feature dimension.
    pub d_in: usize,
    /// Output feature dimension.
    pub d_out: usize,
    /// Negative slope for the attention LeakyReLU.
    #[config(default = 0.2)]
    pub alpha: f64,
    /// Attention dropout rate.
    #[config(default = 0.2)]
    pub dropout: f64,
    /// Apply the ELU output nonlinearity (hidden stages concatenate heads;
    /// the averaged output stage does not activate).
    #[config(default = true)]
    pub concat: bool,
}

/// Single-head dense graph attention.
///
/// Scores `e_ij = LeakyReLU(a_src·W h_i + a_dst·W h_j)`, masked to the
/// adjacency, softmax-normalized per row, then aggregates `Σ_j α_ij W h_j`.
#[derive(Module, Debug)]
pub struct GraphAttentionLayer<B: Backend> {
    w: Linear<B>,
    attn_src: Linear<B>,
    attn_dst: Linear<B>,
    dropout: Dropout,
    alpha: f64,
    concat: bool,
}

impl GraphAttentionConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GraphAttentionLayer<B> {
        GraphAttentionLayer {
            w: LinearConfig::new(self.d_in, self.d_out).with_bias(false).init(device),
            attn_src: LinearConfig::new(self.d_out, 1).with_bias(false).init(device),
            attn_dst: LinearConfig::new(self.d_out, 1).with_bias(false).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            alpha: self.alpha,
            concat: self.concat,
        }
    }
}

impl<B: Backend> GraphAttentionLayer<B> {
    /// Forward pass.
    ///
    /// - `nodes`: [batch, slots, d_in]
    /// - `adjacency`: [batch, slots, slots], nonzero where an edge exists
    ///
    /// Returns: [batch, slots, d_out]
    pub fn forward(&self, nodes: Tensor<B, 3>, adjacency: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, slots, _] = nodes.dims();

        let wh = self.w.forward(nodes); // [batch, slots, d_out]
        let f_src = self.attn_src.forward(wh.clone()); // [batch, slots, 1]
        let f_dst = self.attn_dst.forward(wh.clone()); // [batch, slots, 1]

        // e_ij = LeakyReLU(f_src_i + f_dst_j), broadcast to [batch, S, S].
        let scores = f_src.expand([batch, slots, slots])
            + f_dst.swap_dims(1, 2).expand([batch, slots, slots]);
        let scores = leaky_relu(scores, self.alpha);

        let disconnected = adjacency.equal_elem(0.0);
        let masked = scores.mask_fill(disconnected, MASK_VALUE);
        let weights = self.dropout.forward(softmax(masked, 2));

        let out = weights.matmul(wh); // [batch, slots, d_out]
        if self.concat {
            elu(out)
        } else {
            out
        }
    }
}

/// ELU with unit scale: `x` for `x > 0`, `exp(x) − 1` otherwise.
fn elu<B: Backend>(x: Tensor<B, 3>) -> Tensor<B, 3> {
    x.clone().clamp_min(0.0) + (x.clamp_max(0.0).exp() - 1.0)
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn forward_shape() {
        let device = Default::default();
        let layer = GraphAttentionConfig::new(16, 8).init::<B>(&device);

        let nodes = Tensor::<B, 3>::zeros([2, 5, 16], &device);
        let adjacency = Tensor::<B, 3>::from_data(
            TensorData::new(
                {
                    // self-loops only
                    let mut a = vec![0.0f32; 2 * 5 * 5];
                    for b in 0..2 {
                        for s in 0..5 {
                            a[(b * 5 + s) * 5 + s] = 1.0;
                        }
                    }
                    a
                },
                [2, 5, 5],
            ),
            &device,
        );

        let out = layer.forward(nodes, adjacency);
        assert_eq!(out.dims(), [2, 5, 8]);
    }

    #[test]
    fn disconnected_neighbors_get_zero_weight() {
        let device = Default::default();
        let layer = GraphAttentionConfig::new(4, 4).init::<B>(&device);

        // Node 0 connects only to itself; nodes carry distinct features.
        let nodes = Tensor::<B, 3>::from_data(
            TensorData::new(
                vec![
                    1.0f32, 0.0, 0.0, 0.0, //
                    0.0, 5.0, 0.0, 0.0, //
                ],
                [1, 2, 4],
            ),
            &device,
        );
        let adjacency = Tensor::<B, 3>::from_data(
            TensorData::new(vec![1.0f32, 0.0, 1.0, 1.0], [1, 2, 2]),
            &device,
        );

        // With node 1 masked out for node 0, node 0's output must equal
        // ELU(W h_0) exactly (its softmax row collapses onto itself).
        let out = layer.forward(nodes.clone(), adjacency);
        let wh = layer.w.forward(nodes);
        let expected = elu(wh);
        let out = out.slice([0..1, 0..1]).into_data().to_vec::<f32>().unwrap();
        let expected = expected
            .slice([0..1, 0..1])
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        for (a, b) in out.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-5, "{} vs {}", a, b);
        }
    }
}
