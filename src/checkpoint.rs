//! Checkpoint management.
//!
//! Uses burn's native record format (NamedMpk) at full precision. A run
//! writes into one directory (named from its hyperparameters) with a tag
//! per saved state; only model weights are persisted.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

/// Save a model checkpoint as `<dir>/<tag>.mpk`.
pub fn save_checkpoint<B: Backend, M: Module<B> + Clone>(
    model: &M,
    dir: &Path,
    tag: &str,
) -> Result<PathBuf, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("mkdir {}: {}", dir.display(), e))?;

    let path = dir.join(tag);
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.clone(), &recorder)
        .map_err(|e| format!("save {}: {}", path.display(), e))?;

    // burn appends the .mpk extension
    Ok(path.with_extension("mpk"))
}

/// Load a checkpoint into a freshly initialized model.
///
/// Returns `None` when `<dir>/<tag>.mpk` does not exist.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    dir: &Path,
    tag: &str,
    device: &B::Device,
) -> Result<Option<M>, String> {
    let path = dir.join(tag);
    if !path.with_extension("mpk").exists() {
        return Ok(None);
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let loaded = model
        .load_file(path.clone(), &recorder, device)
        .map_err(|e| format!("load {}: {}", path.display(), e))?;
    Ok(Some(loaded))
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GlmpConfig, RunSettings};
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn roundtrip_restores_weights() {
        let device = Default::default();
        let settings = RunSettings::default();
        let config = GlmpConfig::new()
            .with_hidden(8)
            .with_hops(1)
            .with_nheads(2)
            .with_recurrent_size(2);
        let model = config.init::<B>(20, &settings, &device);

        let dir = tempfile::tempdir().unwrap();
        let path = save_checkpoint(&model, dir.path(), "best").unwrap();
        assert!(path.exists());

        let fresh = config.init::<B>(20, &settings, &device);
        let loaded = load_checkpoint(fresh, dir.path(), "best", &device)
            .unwrap()
            .expect("checkpoint exists");

        // The restored encoder must produce identical outputs to the saved one.
        let conv = Tensor::<B, 3, Int>::from_data(
            TensorData::new((0..12).map(|i| (i % 7) as i32 + 5).collect::<Vec<_>>(), [1, 3, 4]),
            &device,
        );
        let (_, saved_summary) = model.encoder.forward(conv.clone(), &[3]);
        let (_, loaded_summary) = loaded.encoder.forward(conv, &[3]);
        assert_eq!(
            saved_summary.into_data().to_vec::<f32>().unwrap(),
            loaded_summary.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn missing_checkpoint_is_none() {
        let device = Default::default();
        let settings = RunSettings::default();
        let config = GlmpConfig::new()
            .with_hidden(8)
            .with_hops(1)
            .with_nheads(2)
            .with_recurrent_size(2);
        let model = config.init::<B>(20, &settings, &device);

        let dir = tempfile::tempdir().unwrap();
        let loaded = load_checkpoint(model, dir.path(), "best", &device).unwrap();
        assert!(loaded.is_none());
    }
}
