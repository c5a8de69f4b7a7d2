//! Gated graph-recurrent propagation (GraphGRU).
//!
//! [`GraphGruCell`] performs one gated update for a node from its own input
//! features plus up to `recurrent_size` incoming-edge states, each
//! independently maskable and optionally gated by a learned edge-type
//! embedding. [`GraphGru`] drives the cell across a slot sequence, gathering
//! each slot's dependency states from the already-propagated bank, and
//! [`BidirectionalGraphGru`] runs both directions and merges them.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Embedding, EmbeddingConfig, Initializer, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation::{sigmoid, tanh};

use crate::data::memory::GraphRecurrenceInputs;

// ─── Merge Modes ──────────────────────────────────────────────────

/// How the two propagation directions are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Concatenate along the feature dimension (doubles the width).
    Concat,
    Sum,
    Ave,
    Mul,
}

impl MergeMode {
    /// Parse a merge-mode name. Unrecognized names are a configuration
    /// error and fail immediately.
    pub fn parse(name: &str) -> Result<Self, String> {
        match name {
            "concat" => Ok(Self::Concat),
            "sum" => Ok(Self::Sum),
            "ave" => Ok(Self::Ave),
            "mul" => Ok(Self::Mul),
            other => Err(format!("unrecognized merge mode '{}'", other)),
        }
    }
}

// ─── Cell ─────────────────────────────────────────────────────────

/// GraphGRU cell configuration.
#[derive(Config, Debug)]
pub struct GraphGruCellConfig {
    /// Node input feature dimension.
    pub input_dim: usize,
    /// Hidden state dimension.
    pub hidden: usize,
    /// Number of incoming-edge state slots.
    #[config(default = 4)]
    pub recurrent_size: usize,
}

/// One step of gated propagation for a node.
///
/// The input side is a single affine transform split into update, reset and
/// candidate chunks; every edge slot has its own recurrent kernel. Slot
/// contributions are averaged over the fixed `recurrent_size` (not the
/// active-slot count), so nodes with fewer active incoming edges are
/// implicitly down-weighted.
#[derive(Module, Debug)]
pub struct GraphGruCell<B: Backend> {
    input_kernel: Linear<B>,
    recurrent_kernels: Vec<Linear<B>>,
    recurrent_size: usize,
    hidden: usize,
}

impl GraphGruCellConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GraphGruCell<B> {
        let recurrent_kernels = (0..self.recurrent_size)
            .map(|_| LinearConfig::new(self.hidden, 3 * self.hidden).init(device))
            .collect();
        GraphGruCell {
            input_kernel: LinearConfig::new(self.input_dim, 3 * self.hidden).init(device),
            recurrent_kernels,
            recurrent_size: self.recurrent_size,
            hidden: self.hidden,
        }
    }
}

impl<B: Backend> GraphGruCell<B> {
    /// One propagation step.
    ///
    /// - `input`: [batch, input_dim] — the node's own features
    /// - `states`: up to `recurrent_size` prior states, [batch, hidden] each
    /// - `edge_gates`: optional per-slot gates [batch, states.len(), hidden];
    ///   when present, each slot state is element-wise gated before it
    ///   participates in the update
    /// - `mask`: [batch, recurrent_size] — 1.0 where the slot is active
    ///
    /// Returns the node's next state, [batch, hidden].
    ///
    /// Panics if more states than `recurrent_size` are supplied, or if the
    /// gate tensor does not cover every supplied state.
    pub fn forward(
        &self,
        input: Tensor<B, 2>,
        states: &[Tensor<B, 2>],
        edge_gates: Option<Tensor<B, 3>>,
        mask: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        assert!(
            states.len() <= self.recurrent_size,
            "{} prior states supplied but the cell has {} recurrent slots",
            states.len(),
            self.recurrent_size
        );
        if let Some(gates) = &edge_gates {
            assert!(
                gates.dims()[1] >= states.len(),
                "edge gates cover {} slots but {} states were supplied",
                gates.dims()[1],
                states.len()
            );
        }

        let [batch, _] = input.dims();
        let h = self.hidden;

        let matrix_x = self.input_kernel.forward(input);
        let x_z = matrix_x.clone().slice([0..batch, 0..h]);
        let x_r = matrix_x.clone().slice([0..batch, h..2 * h]);
        let x_h = matrix_x.slice([0..batch, 2 * h..3 * h]);

        let device = x_h.device();
        let mut accumulate_h = Tensor::<B, 2>::zeros([batch, h], &device);
        let mut accumulate_z_h = Tensor::<B, 2>::zeros([batch, h], &device);
        let mut accumulate_z = Tensor::<B, 2>::zeros([batch, h], &device);

        for (k, state) in states.iter().enumerate() {
            let state = match &edge_gates {
                Some(gates) => {
                    let gate = gates
                        .clone()
                        .slice([0..batch, k..k + 1])
                        .squeeze_dim::<2>(1);
                    state.clone() * gate
                }
                None => state.clone(),
            };

            let matrix_inner = self.recurrent_kernels[k].forward(state.clone());
            let recurrent_z = matrix_inner.clone().slice([0..batch, 0..h]);
            let recurrent_r = matrix_inner.clone().slice([0..batch, h..2 * h]);
            let recurrent_h = matrix_inner.slice([0..batch, 2 * h..3 * h]);

            let z = sigmoid(x_z.clone() + recurrent_z);
            let r = sigmoid(x_r.clone() + recurrent_r);

            let slot_mask = mask.clone().slice([0..batch, k..k + 1]); // [batch, 1]

            accumulate_h = accumulate_h + r * recurrent_h * slot_mask.clone();
            accumulate_z_h = accumulate_z_h + z.clone() * state * slot_mask.clone();
            accumulate_z = accumulate_z + z * slot_mask;
        }

        let scale = self.recurrent_size as f64;
        let candidate = tanh(x_h + accumulate_h / scale);
        let gate = accumulate_z / scale;
        (gate.clone().neg() + 1.0) * candidate + accumulate_z_h / scale
    }

    /// Input-side candidate chunk `x_h` (exposed for boundary checks).
    #[cfg(test)]
    fn input_candidate(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, _] = input.dims();
        let h = self.hidden;
        self.input_kernel
            .forward(input)
            .slice([0..batch, 2 * h..3 * h])
    }
}

// ─── Sequence Driver ──────────────────────────────────────────────

/// Drives the cell across a slot sequence in one direction.
///
/// Each slot's dependency states are gathered from a bank of
/// already-propagated outputs; slots the direction has not reached yet
/// resolve to the initial state (and are masked inactive by construction).
#[derive(Module, Debug)]
pub struct GraphGru<B: Backend> {
    cell: GraphGruCell<B>,
    go_backwards: bool,
    recurrent_size: usize,
}

impl<B: Backend> GraphGru<B> {
    pub fn new(cell: GraphGruCell<B>, go_backwards: bool, recurrent_size: usize) -> Self {
        Self {
            cell,
            go_backwards,
            recurrent_size,
        }
    }

    /// Propagate along the sequence.
    ///
    /// - `inputs`: [batch, slots, input_dim]
    /// - `deps`: [batch, slots, R] — dependency slot index per edge slot
    /// - `edge_types`: [batch, slots, R] — edge type ids
    /// - `cell_mask`: [batch, slots, R] — 1.0 where the edge slot is active
    /// - `edge_embed`: shared edge-type embedding, or None for the plain cell
    /// - `initial`: [batch, hidden] — state seen by out-of-range dependencies
    ///
    /// Returns: [batch, slots, hidden]
    pub fn forward(
        &self,
        inputs: Tensor<B, 3>,
        deps: Tensor<B, 3, Int>,
        edge_types: Tensor<B, 3, Int>,
        cell_mask: Tensor<B, 3>,
        edge_embed: Option<&Embedding<B>>,
        initial: Tensor<B, 2>,
    ) -> Tensor<B, 3> {
        let [batch, slots, _] = inputs.dims();
        let hidden = initial.dims()[1];
        let r = self.recurrent_size;

        let mut bank =
            Tensor::<B, 3>::ones([batch, slots, hidden], &inputs.device())
                * initial.unsqueeze_dim::<3>(1);

        let order: Vec<usize> = if self.go_backwards {
            (0..slots).rev().collect()
        } else {
            (0..slots).collect()
        };

        for t in order {
            let x_t = inputs
                .clone()
                .slice([0..batch, t..t + 1])
                .squeeze_dim::<2>(1);
            let mask_t = cell_mask
                .clone()
                .slice([0..batch, t..t + 1, 0..r])
                .squeeze_dim::<2>(1);

            let mut states = Vec::with_capacity(r);
            for k in 0..r {
                let idx = deps
                    .clone()
                    .slice([0..batch, t..t + 1, k..k + 1])
                    .reshape([batch, 1, 1])
                    .expand([batch, 1, hidden]);
                states.push(bank.clone().gather(1, idx).squeeze_dim::<2>(1));
            }

            let gates = edge_embed.map(|embed| {
                let types_t = edge_types
                    .clone()
                    .slice([0..batch, t..t + 1, 0..r])
                    .squeeze_dim::<2>(1); // [batch, R]
                embed.forward(types_t) // [batch, R, hidden]
            });

            let h_t = self.cell.forward(x_t, &states, gates, mask_t);
            bank = bank.slice_assign([0..batch, t..t + 1, 0..hidden], h_t.unsqueeze_dim::<3>(1));
        }

        bank
    }
}

// ─── Bidirectional Wrapper ────────────────────────────────────────

/// Bidirectional GraphGRU configuration.
#[derive(Config, Debug)]
pub struct BidirectionalGraphGruConfig {
    pub input_dim: usize,
    pub hidden: usize,
    /// Number of KB edge types for the shared edge embedding.
    pub edge_types: usize,
    #[config(default = 4)]
    pub recurrent_size: usize,
}

/// Two [`GraphGru`] passes (ascending and descending slot order) sharing one
/// edge-type embedding, merged per [`MergeMode`].
#[derive(Module, Debug)]
pub struct BidirectionalGraphGru<B: Backend> {
    edge_embed: Embedding<B>,
    forward_layer: GraphGru<B>,
    backward_layer: GraphGru<B>,
}

impl BidirectionalGraphGruConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> BidirectionalGraphGru<B> {
        let cell = |_| {
            GraphGruCellConfig::new(self.input_dim, self.hidden)
                .with_recurrent_size(self.recurrent_size)
                .init(device)
        };
        BidirectionalGraphGru {
            edge_embed: EmbeddingConfig::new(self.edge_types, self.hidden)
                .with_initializer(Initializer::Normal {
                    mean: 0.0,
                    std: 1.0,
                })
                .init(device),
            forward_layer: GraphGru::new(cell(0), false, self.recurrent_size),
            backward_layer: GraphGru::new(cell(1), true, self.recurrent_size),
        }
    }
}

impl<B: Backend> BidirectionalGraphGru<B> {
    /// Propagate both directions over the slot sequence and merge.
    ///
    /// Panics if `initial_state` is absent (both directions require one).
    pub fn forward(
        &self,
        inputs: Tensor<B, 3>,
        graph: &GraphRecurrenceInputs<B>,
        merge: MergeMode,
        initial_state: Option<Tensor<B, 2>>,
    ) -> Tensor<B, 3> {
        let initial = initial_state.expect("initial state is required for graph propagation");

        let fwd = self.forward_layer.forward(
            inputs.clone(),
            graph.deps_fwd.clone(),
            graph.types_fwd.clone(),
            graph.mask_fwd.clone(),
            Some(&self.edge_embed),
            initial.clone(),
        );
        let bwd = self.backward_layer.forward(
            inputs,
            graph.deps_bwd.clone(),
            graph.types_bwd.clone(),
            graph.mask_bwd.clone(),
            Some(&self.edge_embed),
            initial,
        );

        match merge {
            MergeMode::Concat => Tensor::cat(vec![fwd, bwd], 2),
            MergeMode::Sum => fwd + bwd,
            MergeMode::Ave => (fwd + bwd) / 2.0,
            MergeMode::Mul => fwd * bwd,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn cell(input_dim: usize, hidden: usize, r: usize) -> GraphGruCell<B> {
        let device = Default::default();
        GraphGruCellConfig::new(input_dim, hidden)
            .with_recurrent_size(r)
            .init(&device)
    }

    fn randomish(shape: [usize; 2], scale: f32) -> Tensor<B, 2> {
        let device = Default::default();
        let data: Vec<f32> = (0..shape[0] * shape[1])
            .map(|i| ((i * 37 % 19) as f32 / 19.0 - 0.5) * scale)
            .collect();
        Tensor::from_data(TensorData::new(data, shape), &device)
    }

    #[test]
    fn masked_out_slots_contribute_nothing() {
        let device = Default::default();
        let cell = cell(6, 5, 3);
        let input = randomish([2, 6], 2.0);
        let states: Vec<_> = (0..3).map(|_| randomish([2, 5], 1.0)).collect();
        let mask = Tensor::<B, 2>::zeros([2, 3], &device);

        let out = cell.forward(input.clone(), &states, None, mask);
        let expected = tanh(cell.input_candidate(input));

        assert_eq!(
            out.into_data().to_vec::<f32>().unwrap(),
            expected.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn cell_is_a_pure_function() {
        let device = Default::default();
        let cell = cell(4, 4, 2);
        let input = randomish([3, 4], 1.5);
        let states: Vec<_> = (0..2).map(|_| randomish([3, 4], 0.7)).collect();
        let mask = Tensor::<B, 2>::ones([3, 2], &device);

        let a = cell
            .forward(input.clone(), &states, None, mask.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let b = cell
            .forward(input, &states, None, mask)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "recurrent slots")]
    fn too_many_states_is_rejected() {
        let device = Default::default();
        let cell = cell(4, 4, 2);
        let input = Tensor::<B, 2>::zeros([1, 4], &device);
        let states: Vec<_> = (0..3).map(|_| Tensor::<B, 2>::zeros([1, 4], &device)).collect();
        let mask = Tensor::<B, 2>::ones([1, 2], &device);
        let _ = cell.forward(input, &states, None, mask);
    }

    #[test]
    fn zero_edge_gates_neutralize_states() {
        let device = Default::default();
        let cell = cell(4, 4, 2);
        let input = randomish([2, 4], 1.0);
        let states: Vec<_> = (0..2).map(|_| randomish([2, 4], 1.0)).collect();
        let zero_states: Vec<_> = (0..2).map(|_| Tensor::<B, 2>::zeros([2, 4], &device)).collect();
        let mask = Tensor::<B, 2>::ones([2, 2], &device);
        let zero_gates = Tensor::<B, 3>::zeros([2, 2, 4], &device);

        let gated = cell
            .forward(input.clone(), &states, Some(zero_gates), mask.clone())
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let zeroed = cell
            .forward(input, &zero_states, None, mask)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(gated, zeroed);
    }

    #[test]
    fn merge_mode_parse() {
        assert_eq!(MergeMode::parse("concat").unwrap(), MergeMode::Concat);
        assert_eq!(MergeMode::parse("ave").unwrap(), MergeMode::Ave);
        assert!(MergeMode::parse("stack").is_err());
    }

    fn recurrence_inputs(batch: usize, slots: usize, r: usize) -> GraphRecurrenceInputs<B> {
        let device = Default::default();
        let volume = batch * slots * r;
        let mut deps_fwd = vec![0i32; volume];
        let mut mask_fwd = vec![0.0f32; volume];
        let mut deps_bwd = vec![0i32; volume];
        let mut mask_bwd = vec![0.0f32; volume];
        // Chain: each slot depends on its predecessor (fwd) / successor (bwd).
        for b in 0..batch {
            for s in 1..slots {
                deps_fwd[(b * slots + s) * r] = (s - 1) as i32;
                mask_fwd[(b * slots + s) * r] = 1.0;
            }
            for s in 0..slots - 1 {
                deps_bwd[(b * slots + s) * r] = (s + 1) as i32;
                mask_bwd[(b * slots + s) * r] = 1.0;
            }
        }
        let shape = [batch, slots, r];
        GraphRecurrenceInputs {
            deps_fwd: Tensor::from_data(TensorData::new(deps_fwd, shape), &device),
            types_fwd: Tensor::<B, 3, Int>::zeros(shape, &device),
            mask_fwd: Tensor::from_data(TensorData::new(mask_fwd, shape), &device),
            deps_bwd: Tensor::from_data(TensorData::new(deps_bwd, shape), &device),
            types_bwd: Tensor::<B, 3, Int>::zeros(shape, &device),
            mask_bwd: Tensor::from_data(TensorData::new(mask_bwd, shape), &device),
        }
    }

    #[test]
    fn bidirectional_merge_shapes() {
        let device = Default::default();
        let layer = BidirectionalGraphGruConfig::new(6, 6, 4)
            .with_recurrent_size(2)
            .init::<B>(&device);
        let inputs = Tensor::<B, 3>::zeros([2, 5, 6], &device);
        let graph = recurrence_inputs(2, 5, 2);
        let initial = Tensor::<B, 2>::zeros([2, 6], &device);

        let cat = layer.forward(
            inputs.clone(),
            &graph,
            MergeMode::Concat,
            Some(initial.clone()),
        );
        assert_eq!(cat.dims(), [2, 5, 12]);

        let sum = layer.forward(
            inputs.clone(),
            &graph,
            MergeMode::Sum,
            Some(initial.clone()),
        );
        let ave = layer.forward(inputs, &graph, MergeMode::Ave, Some(initial));
        assert_eq!(sum.dims(), [2, 5, 6]);
        // ave is exactly half of sum.
        let sum_v = sum.into_data().to_vec::<f32>().unwrap();
        let ave_v = ave.into_data().to_vec::<f32>().unwrap();
        for (s, a) in sum_v.iter().zip(&ave_v) {
            assert!((s / 2.0 - a).abs() < 1e-6);
        }
    }

    #[test]
    #[should_panic(expected = "initial state")]
    fn missing_initial_state_is_rejected() {
        let device = Default::default();
        let layer = BidirectionalGraphGruConfig::new(4, 4, 4)
            .with_recurrent_size(2)
            .init::<B>(&device);
        let inputs = Tensor::<B, 3>::zeros([1, 3, 4], &device);
        let graph = recurrence_inputs(1, 3, 2);
        let _ = layer.forward(inputs, &graph, MergeMode::Sum, None);
    }
}
