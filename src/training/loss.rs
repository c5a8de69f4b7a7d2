//! Loss terms for the joint objective.
//!
//! The global pointer is supervised with binary cross-entropy against the
//! gold selector mask; the sketch and pointer sequences with cross-entropy
//! averaged over non-padding positions only.

use burn::prelude::*;
use burn::tensor::activation;

/// Masked sequence cross-entropy.
///
/// - `logits`: [steps, batch, classes] — per-step unnormalized scores
/// - `targets`: [batch, steps] — gold class per step
/// - `lengths`: true target length per sample; positions beyond a sample's
///   length contribute nothing
///
/// Returns the mean negative log-likelihood over unmasked positions.
pub fn masked_cross_entropy<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 2, Int>,
    lengths: &[usize],
) -> Tensor<B, 1> {
    let [steps, batch, classes] = logits.dims();
    assert_eq!(
        targets.dims(),
        [batch, steps],
        "targets must be [batch, steps] matching the logit sequence"
    );
    let device = logits.device();

    // [steps, batch, classes] → [batch, steps, classes] → [batch*steps, classes]
    let flat = logits.swap_dims(0, 1).reshape([batch * steps, classes]);
    let log_probs = activation::log_softmax(flat, 1);

    let targets_flat = targets.reshape([batch * steps, 1]);
    let picked = log_probs.gather(1, targets_flat).reshape([batch * steps]);

    let mut mask = vec![0.0f32; batch * steps];
    let mut total = 0.0f32;
    for (b, &len) in lengths.iter().enumerate() {
        for t in 0..len.min(steps) {
            mask[b * steps + t] = 1.0;
            total += 1.0;
        }
    }
    let mask = Tensor::<B, 1>::from_data(TensorData::new(mask, [batch * steps]), &device);

    let total = total.max(1.0);
    (picked * mask).sum().neg() / total
}

/// Numerically stable binary cross-entropy with logits, averaged over every
/// element: `max(x, 0) − x·y + ln(1 + exp(−|x|))`.
pub fn binary_cross_entropy_with_logits<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let loss = logits.clone().clamp_min(0.0) - logits.clone() * targets
        + (logits.abs().neg().exp() + 1.0).log();
    loss.mean()
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn masked_cross_entropy_ignores_padding_steps() {
        let device = Default::default();
        // 2 steps, 1 sample, 3 classes. Step 1 is padding with terrible
        // logits; a length of 1 must hide it completely.
        let logits = Tensor::<B, 3>::from_data(
            TensorData::new(
                vec![
                    5.0f32, 0.0, 0.0, // step 0 — confident, correct
                    -50.0, 50.0, 0.0, // step 1 — would be a huge loss
                ],
                [2, 1, 3],
            ),
            &device,
        );
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(vec![0i32, 0], [1, 2]), &device);

        let masked = masked_cross_entropy(logits.clone(), targets.clone(), &[1])
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];
        let unmasked = masked_cross_entropy(logits, targets, &[2])
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];

        assert!(masked < 0.1, "masked loss too high: {}", masked);
        assert!(unmasked > 10.0, "padding step was not counted: {}", unmasked);
    }

    #[test]
    fn bce_matches_the_closed_form() {
        let device = Default::default();
        let logits =
            Tensor::<B, 2>::from_data(TensorData::new(vec![0.0f32, 2.0], [1, 2]), &device);
        let targets =
            Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, 0.0], [1, 2]), &device);

        let loss = binary_cross_entropy_with_logits(logits, targets)
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];

        // −ln σ(0) = ln 2; −ln(1 − σ(2)) = ln(1 + e²)
        let expected = ((2.0f32).ln() + (1.0 + (2.0f32).exp()).ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-5, "{} vs {}", loss, expected);
    }

    #[test]
    fn bce_is_finite_for_extreme_logits() {
        let device = Default::default();
        let logits =
            Tensor::<B, 2>::from_data(TensorData::new(vec![500.0f32, -500.0], [1, 2]), &device);
        let targets =
            Tensor::<B, 2>::from_data(TensorData::new(vec![0.0f32, 1.0], [1, 2]), &device);
        let loss = binary_cross_entropy_with_logits(logits, targets)
            .into_data()
            .to_vec::<f32>()
            .unwrap()[0];
        assert!(loss.is_finite());
    }
}
