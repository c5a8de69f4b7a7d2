//! Dialogue-history encoder.
//!
//! Bag-of-token embedding per conversation position followed by a
//! bidirectional GRU; the direction outputs are summed and the two final
//! states are projected down to one summary vector. The GRU step is built
//! from paired input/hidden linear transforms (the gate-controller layout
//! burn's own recurrent cells use) because the decoder needs to re-drive the
//! same cell one step at a time between memory queries.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};

// ─── GRU Cell ─────────────────────────────────────────────────────

/// Minimal GRU step: three gates, each a pair of linear transforms.
#[derive(Module, Debug)]
pub struct GruCell<B: Backend> {
    update_input: Linear<B>,
    update_hidden: Linear<B>,
    reset_input: Linear<B>,
    reset_hidden: Linear<B>,
    candidate_input: Linear<B>,
    candidate_hidden: Linear<B>,
}

impl<B: Backend> GruCell<B> {
    pub fn new(d_input: usize, d_hidden: usize, device: &B::Device) -> Self {
        let pair = |d_in: usize| {
            (
                LinearConfig::new(d_in, d_hidden).init(device),
                LinearConfig::new(d_hidden, d_hidden).init(device),
            )
        };
        let (update_input, update_hidden) = pair(d_input);
        let (reset_input, reset_hidden) = pair(d_input);
        let (candidate_input, candidate_hidden) = pair(d_input);
        Self {
            update_input,
            update_hidden,
            reset_input,
            reset_hidden,
            candidate_input,
            candidate_hidden,
        }
    }

    /// One step: `[batch, d_input] × [batch, d_hidden] → [batch, d_hidden]`.
    pub fn step(&self, input: Tensor<B, 2>, hidden: Tensor<B, 2>) -> Tensor<B, 2> {
        let z = sigmoid(
            self.update_input.forward(input.clone()) + self.update_hidden.forward(hidden.clone()),
        );
        let r = sigmoid(
            self.reset_input.forward(input.clone()) + self.reset_hidden.forward(hidden.clone()),
        );
        let n = tanh(
            self.candidate_input.forward(input) + self.candidate_hidden.forward(r * hidden.clone()),
        );
        (z.clone().neg() + 1.0) * n + z * hidden
    }
}

// ─── Context Encoder ──────────────────────────────────────────────

/// Encoder configuration.
#[derive(Config, Debug)]
pub struct ContextRnnConfig {
    pub vocab: usize,
    pub hidden: usize,
    #[config(default = 0.2)]
    pub dropout: f64,
}

/// Bidirectional GRU over the conversation token sequence.
#[derive(Module, Debug)]
pub struct ContextRnn<B: Backend> {
    embedding: Embedding<B>,
    dropout: Dropout,
    fwd: GruCell<B>,
    bwd: GruCell<B>,
    w: Linear<B>,
    hidden: usize,
}

impl ContextRnnConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ContextRnn<B> {
        ContextRnn {
            embedding: EmbeddingConfig::new(self.vocab, self.hidden)
                .with_initializer(Initializer::Normal {
                    mean: 0.0,
                    std: 0.1,
                })
                .init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            fwd: GruCell::new(self.hidden, self.hidden, device),
            bwd: GruCell::new(self.hidden, self.hidden, device),
            w: LinearConfig::new(2 * self.hidden, self.hidden).init(device),
            hidden: self.hidden,
        }
    }
}

impl<B: Backend> ContextRnn<B> {
    /// Encode the conversation.
    ///
    /// - `conv`: [batch, conv_len, MEM_TOKEN_SIZE] token ids
    /// - `lengths`: true conversation length per sample
    ///
    /// Returns per-token outputs `[batch, conv_len, hidden]` (direction sum)
    /// and the summary state `[batch, hidden]`.
    pub fn forward(
        &self,
        conv: Tensor<B, 3, Int>,
        lengths: &[usize],
    ) -> (Tensor<B, 3>, Tensor<B, 2>) {
        let [batch, conv_len, token_width] = conv.dims();
        let device = conv.device();

        // Bag-of-token embedding per position.
        let flat = conv.reshape([batch, conv_len * token_width]);
        let embedded = self
            .embedding
            .forward(flat)
            .reshape([batch, conv_len, token_width, self.hidden])
            .sum_dim(2)
            .squeeze_dim::<3>(2);
        let embedded = self.dropout.forward(embedded);

        // Step masks: 1.0 while t < length, so finished rows hold state.
        let mut step_masks = Vec::with_capacity(conv_len);
        for t in 0..conv_len {
            let data: Vec<f32> = lengths
                .iter()
                .map(|&len| if t < len { 1.0 } else { 0.0 })
                .collect();
            step_masks.push(Tensor::<B, 2>::from_data(
                TensorData::new(data, [batch, 1]),
                &device,
            ));
        }

        let zero = Tensor::<B, 2>::zeros([batch, self.hidden], &device);

        let mut fwd_outputs: Vec<Tensor<B, 2>> = Vec::with_capacity(conv_len);
        let mut h = zero.clone();
        for t in 0..conv_len {
            let x = embedded
                .clone()
                .slice([0..batch, t..t + 1])
                .squeeze_dim::<2>(1);
            let next = self.fwd.step(x, h.clone());
            let m = step_masks[t].clone();
            h = next * m.clone() + h * (m.neg() + 1.0);
            fwd_outputs.push(h.clone());
        }
        let fwd_final = h;

        let mut bwd_outputs: Vec<Tensor<B, 2>> = vec![zero.clone(); conv_len];
        let mut h = zero;
        for t in (0..conv_len).rev() {
            let x = embedded
                .clone()
                .slice([0..batch, t..t + 1])
                .squeeze_dim::<2>(1);
            let next = self.bwd.step(x, h.clone());
            let m = step_masks[t].clone();
            h = next * m.clone() + h * (m.neg() + 1.0);
            bwd_outputs[t] = h.clone();
        }
        let bwd_final = h;

        let outputs: Vec<Tensor<B, 3>> = fwd_outputs
            .into_iter()
            .zip(bwd_outputs)
            .map(|(f, b)| (f + b).unsqueeze_dim::<3>(1))
            .collect();
        let outputs = Tensor::cat(outputs, 1); // [batch, conv_len, hidden]

        let summary = self.w.forward(Tensor::cat(vec![fwd_final, bwd_final], 1));
        (outputs, summary)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
