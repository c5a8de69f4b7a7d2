//! Training loop: teacher-forced joint loss, clipped AdamW, plateau decay.
//!
//! One epoch walks shuffled batches; each batch draws a fresh memory mask
//! and a teacher-forcing coin, runs the joint forward pass, and steps a
//! single optimizer over the composite model with gradient-norm clipping.
//! After every epoch the dev set is decoded greedily; the early-stop metric
//! drives checkpoint promotion, learning-rate halving, and stopping.

use std::path::{Path, PathBuf};

use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::grad_clipping::GradientClippingConfig;

use crate::checkpoint::save_checkpoint;
use crate::config::{EarlyStop, GlmpConfig, RunSettings};
use crate::data::memory::{Batch, Instance};
use crate::data::vocab::Lang;
use crate::inference::evaluate::{evaluate, EvalResult};
use crate::model::glmp::Glmp;
use crate::rng::XorShift64;
use crate::training::loss::{binary_cross_entropy_with_logits, masked_cross_entropy};

/// Training configuration.
pub struct TrainConfig {
    /// Initial learning rate.
    pub lr: f64,
    /// Learning-rate floor for plateau decay.
    pub lr_min: f64,
    /// Weight decay.
    pub weight_decay: f32,
    /// Gradient clipping norm.
    pub grad_clip: f32,
    /// Maximum epochs.
    pub max_epochs: usize,
    /// Epochs without improvement before stopping.
    pub patience: usize,
    /// Early-stopping metric.
    pub early_stop: EarlyStop,
    /// Checkpoint root directory.
    pub save_root: PathBuf,
    /// RNG seed for shuffling, masking, and teacher-forcing draws.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            lr_min: 1e-5,
            weight_decay: 0.0,
            grad_clip: 10.0,
            max_epochs: 50,
            patience: 8,
            early_stop: EarlyStop::Acc,
            save_root: PathBuf::from("save"),
            seed: 1234,
        }
    }
}

/// Create the AdamW optimizer with gradient-norm clipping.
pub fn create_optimizer<B: burn::tensor::backend::AutodiffBackend>(
    config: &TrainConfig,
) -> impl Optimizer<Glmp<B>, B> {
    AdamWConfig::new()
        .with_weight_decay(config.weight_decay)
        .with_grad_clipping(Some(GradientClippingConfig::Norm(config.grad_clip)))
        .init()
}

/// Result of one training epoch.
pub struct EpochResult {
    /// Mean total loss per batch.
    pub avg_loss: f32,
    /// Mean global-pointer (selector) loss.
    pub avg_loss_g: f32,
    /// Mean sketch vocabulary loss.
    pub avg_loss_v: f32,
    /// Mean local-pointer loss.
    pub avg_loss_l: f32,
    pub num_batches: usize,
}

/// Train one epoch over shuffled batches; returns the updated model.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch<B: burn::tensor::backend::AutodiffBackend>(
    model: Glmp<B>,
    instances: &[Instance],
    optimizer: &mut impl Optimizer<Glmp<B>, B>,
    lr: f64,
    lang: &Lang,
    config: &GlmpConfig,
    settings: &RunSettings,
    rng: &mut XorShift64,
    device: &B::Device,
) -> (Glmp<B>, EpochResult) {
    let mut order: Vec<usize> = (0..instances.len()).collect();
    rng.shuffle(&mut order);

    let mut model = model;
    let mut total = 0.0f32;
    let mut total_g = 0.0f32;
    let mut total_v = 0.0f32;
    let mut total_l = 0.0f32;
    let mut num_batches = 0usize;

    for chunk in order.chunks(settings.batch.max(1)) {
        let picked: Vec<Instance> = chunk.iter().map(|&i| instances[i].clone()).collect();
        let batch = Batch::<B>::new(&picked, settings, config.recurrent_size, true, rng, device);

        let use_teacher_forcing = rng.next_f64() < settings.teacher_forcing_ratio;
        let max_target_length = batch.max_response_len();

        let out = model.encode_and_decode(&batch, max_target_length, use_teacher_forcing, false, lang);

        let loss_g = binary_cross_entropy_with_logits(out.global_logits, batch.selector.clone());
        let loss_v = masked_cross_entropy(
            out.vocab_logits,
            batch.sketch.clone(),
            &batch.response_lengths,
        );
        let loss_l = masked_cross_entropy(
            out.ptr_logits,
            batch.ptr_index.clone(),
            &batch.response_lengths,
        );
        let loss = loss_g.clone() + loss_v.clone() + loss_l.clone();

        total += scalar(&loss);
        total_g += scalar(&loss_g);
        total_v += scalar(&loss_v);
        total_l += scalar(&loss_l);
        num_batches += 1;

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optimizer.step(lr, model, grads);
    }

    let denom = num_batches.max(1) as f32;
    (
        model,
        EpochResult {
            avg_loss: total / denom,
            avg_loss_g: total_g / denom,
            avg_loss_v: total_v / denom,
            avg_loss_l: total_l / denom,
            num_batches,
        },
    )
}

fn scalar<B: Backend>(loss: &Tensor<B, 1>) -> f32 {
    loss.clone().into_data().to_vec::<f32>().unwrap()[0]
}

/// Outcome of a full training run.
pub struct TrainOutcome {
    pub best_metric: f32,
    pub best_eval: Option<EvalResult>,
    pub epochs_run: usize,
    pub checkpoint: Option<PathBuf>,
}

/// Full training run with per-epoch dev evaluation, checkpoint promotion on
/// metric improvement, plateau LR halving, and early stopping.
#[allow(clippy::too_many_arguments)]
pub fn train<B: burn::tensor::backend::AutodiffBackend>(
    model: Glmp<B>,
    train_set: &[Instance],
    dev_set: &[Instance],
    lang: &Lang,
    config: &GlmpConfig,
    settings: &RunSettings,
    tcfg: &TrainConfig,
    global_entities: &[String],
    device: &B::Device,
) -> Result<(Glmp<B>, TrainOutcome), String> {
    let mut model = model;
    let mut optimizer = create_optimizer::<B>(tcfg);
    let mut rng = XorShift64::new(tcfg.seed);
    let mut lr = tcfg.lr;

    let max_resp_len = train_set
        .iter()
        .chain(dev_set)
        .map(|i| i.sketch.len())
        .max()
        .unwrap_or(1);

    let run_dir = tcfg.save_root.join(settings.run_name(config, tcfg.lr));
    let mut best_metric = f32::NEG_INFINITY;
    let mut best_eval: Option<EvalResult> = None;
    let mut checkpoint = None;
    let mut stall = 0usize;
    let mut epochs_run = 0usize;

    for epoch in 0..tcfg.max_epochs {
        let (updated, result) = train_epoch(
            model, train_set, &mut optimizer, lr, lang, config, settings, &mut rng, device,
        );
        model = updated;
        epochs_run = epoch + 1;
        eprintln!(
            "  epoch {}/{} | L:{:.2} LG:{:.2} LV:{:.2} LP:{:.2} | lr {:.5}",
            epoch + 1,
            tcfg.max_epochs,
            result.avg_loss,
            result.avg_loss_g,
            result.avg_loss_v,
            result.avg_loss_l,
            lr,
        );

        let eval = evaluate(
            &model.valid(),
            dev_set,
            lang,
            config,
            settings,
            global_entities,
            max_resp_len,
            device,
        );
        let metric = eval.early_stop_value(tcfg.early_stop);
        let improved = metric >= best_metric;
        eprintln!(
            "  dev: ACC {:.4} BLEU {:.2} F1 {:.4}{}",
            eval.acc,
            eval.bleu,
            eval.f1,
            if improved { " *" } else { "" },
        );

        if improved {
            best_metric = metric;
            stall = 0;
            let path = save_checkpoint(&model, &run_dir, "best")?;
            write_eval_report(&eval, &run_dir)?;
            checkpoint = Some(path);
            best_eval = Some(eval);
        } else {
            stall += 1;
            lr = (lr * 0.5).max(tcfg.lr_min);
            if stall >= tcfg.patience {
                eprintln!("  no improvement for {} epochs, stopping", stall);
                break;
            }
        }
    }

    Ok((
        model,
        TrainOutcome {
            best_metric,
            best_eval,
            epochs_run,
            checkpoint,
        },
    ))
}

/// Persist the best dev evaluation next to the checkpoint.
fn write_eval_report(eval: &EvalResult, run_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(run_dir)
        .map_err(|e| format!("mkdir {}: {}", run_dir.display(), e))?;
    let path = run_dir.join("dev_eval.json");
    let json = serde_json::to_string_pretty(eval).map_err(|e| format!("serialize eval: {}", e))?;
    std::fs::write(&path, json).map_err(|e| format!("write {}: {}", path.display(), e))
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::{build_instances, index_vocabulary};
    use crate::data::transcript::parse_transcript;
    use burn::backend::{Autodiff, NdArray};

    type B = Autodiff<NdArray>;

    const SAMPLE: &str = "\
#schedule
0 meeting time 10am
1 when is my meeting\tyour meeting is at 10am\t[\"10am\"]
";

    #[test]
    fn train_epoch_runs_and_loss_is_finite() {
        let device = Default::default();
        let samples = parse_transcript(SAMPLE).unwrap();
        let mut lang = Lang::new();
        index_vocabulary(&mut lang, &samples);
        let instances = build_instances(&samples, &lang);

        let settings = RunSettings {
            batch: 2,
            ..RunSettings::default()
        };
        let config = GlmpConfig::new()
            .with_hidden(8)
            .with_hops(1)
            .with_nheads(2)
            .with_recurrent_size(2);
        let model = config.init::<B>(lang.n_words(), &settings, &device);

        let tcfg = TrainConfig::default();
        let mut optimizer = create_optimizer::<B>(&tcfg);
        let mut rng = XorShift64::new(5);

        let (model, result) = train_epoch(
            model,
            &instances,
            &mut optimizer,
            tcfg.lr,
            &lang,
            &config,
            &settings,
            &mut rng,
            &device,
        );
        assert_eq!(result.num_batches, 1);
        assert!(result.avg_loss.is_finite());
        assert!(result.avg_loss > 0.0);

        // A second epoch must also run on the updated weights.
        let (_model, result2) = train_epoch(
            model,
            &instances,
            &mut optimizer,
            tcfg.lr,
            &lang,
            &config,
            &settings,
            &mut rng,
            &device,
        );
        assert!(result2.avg_loss.is_finite());
    }

    #[test]
    fn full_training_promotes_a_checkpoint() {
        let device = Default::default();
        let samples = parse_transcript(SAMPLE).unwrap();
        let mut lang = Lang::new();
        index_vocabulary(&mut lang, &samples);
        let instances = build_instances(&samples, &lang);

        let settings = RunSettings {
            batch: 2,
            ..RunSettings::default()
        };
        let config = GlmpConfig::new()
            .with_hidden(8)
            .with_hops(1)
            .with_nheads(2)
            .with_recurrent_size(2);
        let model = config.init::<B>(lang.n_words(), &settings, &device);

        let dir = tempfile::tempdir().unwrap();
        let tcfg = TrainConfig {
            max_epochs: 1,
            save_root: dir.path().to_path_buf(),
            ..TrainConfig::default()
        };

        let (_model, outcome) = train(
            model,
            &instances,
            &instances,
            &lang,
            &config,
            &settings,
            &tcfg,
            &[],
            &device,
        )
        .unwrap();

        assert_eq!(outcome.epochs_run, 1);
        let path = outcome.checkpoint.expect("first epoch always improves");
        assert!(path.exists(), "missing checkpoint at {}", path.display());
    }
}
