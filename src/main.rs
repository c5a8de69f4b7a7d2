#![recursion_limit = "512"]

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;

use burn::tensor::backend::AutodiffBackend;

use glmp::checkpoint::load_checkpoint;
use glmp::config::{Dataset, EarlyStop, GlmpConfig, RunSettings};
use glmp::data::edge_pairs::extract_edge_pairs_file;
use glmp::data::memory::{build_instances, index_vocabulary, Instance};
use glmp::data::transcript::{load_global_entities, read_transcript, DialogueSample};
use glmp::data::vocab::Lang;
use glmp::inference::evaluate::evaluate;
use glmp::training::trainer::{train, TrainConfig};

#[derive(Parser)]
#[command(
    name = "glmp",
    version,
    about = "Global-to-local memory pointer networks for task-oriented dialogue"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model on a dataset directory (expects train.txt and dev.txt)
    Train {
        /// Dataset directory
        data: PathBuf,
        /// Dataset flavor: kvr or babi
        #[arg(long, default_value = "kvr")]
        dataset: String,
        /// Hidden / embedding dimension
        #[arg(long, default_value_t = 128)]
        hidden: usize,
        /// Memory hops
        #[arg(long, default_value_t = 3)]
        hops: usize,
        /// Graph-attention heads
        #[arg(long, default_value_t = 4)]
        nheads: usize,
        /// Batch size
        #[arg(long, default_value_t = 8)]
        batch: usize,
        /// Learning rate
        #[arg(long, default_value_t = 1e-3)]
        lr: f64,
        /// Dropout probability
        #[arg(long, default_value_t = 0.2)]
        dropout: f64,
        /// Maximum epochs
        #[arg(long, default_value_t = 50)]
        epochs: usize,
        /// Epochs without improvement before stopping
        #[arg(long, default_value_t = 8)]
        patience: usize,
        /// Early-stop metric: bleu, entf1 or acc
        #[arg(long, default_value = "acc")]
        early_stop: String,
        /// Teacher forcing ratio
        #[arg(long, default_value_t = 0.5)]
        teacher_forcing: f64,
        /// Refine memory with the graph-recurrent pass instead of attention
        #[arg(long)]
        recurrent_refinement: bool,
        /// Disable global-pointer gating
        #[arg(long)]
        ablation_g: bool,
        /// Disable encoder-hidden injection into memory
        #[arg(long)]
        ablation_h: bool,
        /// Use the plain multi-hop memory instead of the graph memory
        #[arg(long)]
        ablation_d: bool,
        /// Disable random memory-token masking during training
        #[arg(long)]
        no_unk_mask: bool,
        /// Print decoded samples during evaluation
        #[arg(long)]
        gen_sample: bool,
        /// Tag appended to the checkpoint directory name
        #[arg(long, default_value = "")]
        add_name: String,
        /// Checkpoint root directory
        #[arg(long, default_value = "save")]
        save_root: PathBuf,
        /// RNG seed
        #[arg(long, default_value_t = 1234)]
        seed: u64,
        /// Train on the wgpu backend instead of the CPU
        #[arg(long)]
        gpu: bool,
    },
    /// Evaluate a checkpoint on the test split (expects test.txt)
    Evaluate {
        /// Dataset directory
        data: PathBuf,
        /// Checkpoint directory produced by `glmp train`
        checkpoint: PathBuf,
        /// Dataset flavor: kvr or babi
        #[arg(long, default_value = "kvr")]
        dataset: String,
        /// Hidden / embedding dimension (must match training)
        #[arg(long, default_value_t = 128)]
        hidden: usize,
        /// Memory hops (must match training)
        #[arg(long, default_value_t = 3)]
        hops: usize,
        /// Graph-attention heads (must match training)
        #[arg(long, default_value_t = 4)]
        nheads: usize,
        /// Batch size
        #[arg(long, default_value_t = 8)]
        batch: usize,
        /// Recurrent refinement (must match training)
        #[arg(long)]
        recurrent_refinement: bool,
        /// Disable global-pointer gating (must match training)
        #[arg(long)]
        ablation_g: bool,
        /// Disable encoder-hidden injection (must match training)
        #[arg(long)]
        ablation_h: bool,
        /// Plain multi-hop memory (must match training)
        #[arg(long)]
        ablation_d: bool,
        /// Print decoded samples
        #[arg(long)]
        gen_sample: bool,
    },
    /// Extract KB entity-pair edges from a transcript
    ExtractEdges {
        /// Input transcript file
        input: PathBuf,
        /// Output edge-pair file
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Train {
            data,
            dataset,
            hidden,
            hops,
            nheads,
            batch,
            lr,
            dropout,
            epochs,
            patience,
            early_stop,
            teacher_forcing,
            recurrent_refinement,
            ablation_g,
            ablation_h,
            ablation_d,
            no_unk_mask,
            gen_sample,
            add_name,
            save_root,
            seed,
            gpu,
        } => cmd_train(TrainOpts {
            data,
            dataset,
            hidden,
            hops,
            nheads,
            batch,
            lr,
            dropout,
            epochs,
            patience,
            early_stop,
            teacher_forcing,
            recurrent_refinement,
            ablation_g,
            ablation_h,
            ablation_d,
            no_unk_mask,
            gen_sample,
            add_name,
            save_root,
            seed,
            gpu,
        }),
        Command::Evaluate {
            data,
            checkpoint,
            dataset,
            hidden,
            hops,
            nheads,
            batch,
            recurrent_refinement,
            ablation_g,
            ablation_h,
            ablation_d,
            gen_sample,
        } => cmd_evaluate(EvalOpts {
            data,
            checkpoint,
            dataset,
            hidden,
            hops,
            nheads,
            batch,
            recurrent_refinement,
            ablation_g,
            ablation_h,
            ablation_d,
            gen_sample,
        }),
        Command::ExtractEdges { input, output } => cmd_extract_edges(&input, &output),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

struct TrainOpts {
    data: PathBuf,
    dataset: String,
    hidden: usize,
    hops: usize,
    nheads: usize,
    batch: usize,
    lr: f64,
    dropout: f64,
    epochs: usize,
    patience: usize,
    early_stop: String,
    teacher_forcing: f64,
    recurrent_refinement: bool,
    ablation_g: bool,
    ablation_h: bool,
    ablation_d: bool,
    no_unk_mask: bool,
    gen_sample: bool,
    add_name: String,
    save_root: PathBuf,
    seed: u64,
    gpu: bool,
}

struct EvalOpts {
    data: PathBuf,
    checkpoint: PathBuf,
    dataset: String,
    hidden: usize,
    hops: usize,
    nheads: usize,
    batch: usize,
    recurrent_refinement: bool,
    ablation_g: bool,
    ablation_h: bool,
    ablation_d: bool,
    gen_sample: bool,
}

/// Read a split, tolerating a missing optional file.
fn read_split(dir: &Path, name: &str, required: bool) -> Result<Vec<DialogueSample>, String> {
    let path = dir.join(name);
    if !path.exists() {
        if required {
            return Err(format!("missing {}", path.display()));
        }
        return Ok(Vec::new());
    }
    read_transcript(&path)
}

/// The global entity list, when the dataset ships one.
fn read_entities(dir: &Path) -> Result<Vec<String>, String> {
    for name in ["kvret_entities.json", "entities.json"] {
        let path = dir.join(name);
        if path.exists() {
            return load_global_entities(&path);
        }
    }
    Ok(Vec::new())
}

/// Build one shared vocabulary over every available split, so ids stay
/// stable between training and later evaluation runs.
fn build_lang(splits: &[&[DialogueSample]]) -> Lang {
    let mut lang = Lang::new();
    for split in splits {
        index_vocabulary(&mut lang, split);
    }
    lang
}

fn cmd_train(opts: TrainOpts) -> Result<(), String> {
    if opts.gpu {
        use burn::backend::{wgpu::WgpuDevice, Autodiff, Wgpu};
        let device = WgpuDevice::default();
        run_train::<Autodiff<Wgpu>>(opts, &device)
    } else {
        use burn::backend::{Autodiff, NdArray};
        let device = Default::default();
        run_train::<Autodiff<NdArray>>(opts, &device)
    }
}

fn run_train<B: AutodiffBackend>(opts: TrainOpts, device: &B::Device) -> Result<(), String> {
    let train_samples = read_split(&opts.data, "train.txt", true)?;
    let dev_samples = read_split(&opts.data, "dev.txt", true)?;
    let test_samples = read_split(&opts.data, "test.txt", false)?;
    let global_entities = read_entities(&opts.data)?;

    let lang = build_lang(&[&train_samples, &dev_samples, &test_samples]);

    let settings = RunSettings {
        ablation_g: opts.ablation_g,
        ablation_h: opts.ablation_h,
        ablation_d: opts.ablation_d,
        unk_mask: !opts.no_unk_mask,
        teacher_forcing_ratio: opts.teacher_forcing,
        dataset: Dataset::parse(&opts.dataset)?,
        dropout: opts.dropout,
        batch: opts.batch,
        add_name: opts.add_name.clone(),
        gen_sample: opts.gen_sample,
    };
    let config = GlmpConfig::new()
        .with_hidden(opts.hidden)
        .with_hops(opts.hops)
        .with_nheads(opts.nheads)
        .with_recurrent_refinement(opts.recurrent_refinement);
    let tcfg = TrainConfig {
        lr: opts.lr,
        max_epochs: opts.epochs,
        patience: opts.patience,
        early_stop: EarlyStop::parse(&opts.early_stop)?,
        save_root: opts.save_root.clone(),
        seed: opts.seed,
        ..TrainConfig::default()
    };

    let train_set: Vec<Instance> = build_instances(&train_samples, &lang);
    let dev_set: Vec<Instance> = build_instances(&dev_samples, &lang);
    eprintln!(
        "Training on {} instances ({} dialogues), dev {} instances, vocab {}",
        train_set.len(),
        train_samples.len(),
        dev_set.len(),
        lang.n_words(),
    );

    let model = config.init::<B>(lang.n_words(), &settings, device);
    let (_model, outcome) = train(
        model,
        &train_set,
        &dev_set,
        &lang,
        &config,
        &settings,
        &tcfg,
        &global_entities,
        device,
    )?;

    match outcome.checkpoint {
        Some(path) => eprintln!(
            "Best {:?} = {:.4} after {} epochs -> {}",
            tcfg.early_stop,
            outcome.best_metric,
            outcome.epochs_run,
            path.display()
        ),
        None => eprintln!("No checkpoint saved ({} epochs)", outcome.epochs_run),
    }
    Ok(())
}

fn cmd_evaluate(opts: EvalOpts) -> Result<(), String> {
    use burn::backend::NdArray;

    let train_samples = read_split(&opts.data, "train.txt", false)?;
    let dev_samples = read_split(&opts.data, "dev.txt", false)?;
    let test_samples = read_split(&opts.data, "test.txt", true)?;
    let global_entities = read_entities(&opts.data)?;

    let lang = build_lang(&[&train_samples, &dev_samples, &test_samples]);

    let settings = RunSettings {
        ablation_g: opts.ablation_g,
        ablation_h: opts.ablation_h,
        ablation_d: opts.ablation_d,
        unk_mask: false,
        dataset: Dataset::parse(&opts.dataset)?,
        batch: opts.batch,
        gen_sample: opts.gen_sample,
        ..RunSettings::default()
    };
    let config = GlmpConfig::new()
        .with_hidden(opts.hidden)
        .with_hops(opts.hops)
        .with_nheads(opts.nheads)
        .with_recurrent_refinement(opts.recurrent_refinement);

    let device = Default::default();
    let model = config.init::<NdArray>(lang.n_words(), &settings, &device);
    let model = load_checkpoint(model, &opts.checkpoint, "best", &device)?
        .ok_or_else(|| format!("no checkpoint 'best' under {}", opts.checkpoint.display()))?;

    let test_set: Vec<Instance> = build_instances(&test_samples, &lang);
    let max_resp_len = test_set.iter().map(|i| i.sketch.len()).max().unwrap_or(1);

    let result = evaluate(
        &model,
        &test_set,
        &lang,
        &config,
        &settings,
        &global_entities,
        max_resp_len,
        &device,
    );

    println!("ACC SCORE:\t{:.4}", result.acc);
    println!("BLEU SCORE:\t{:.2}", result.bleu);
    if settings.dataset == Dataset::Kvr {
        println!("F1 SCORE:\t{:.4}", result.f1);
        println!("\tNAV F1:\t{:.4}", result.f1_nav);
        println!("\tCAL F1:\t{:.4}", result.f1_cal);
        println!("\tWET F1:\t{:.4}", result.f1_wet);
    }
    if let Some(dia) = result.dialogue_acc {
        println!("DIALOG ACC:\t{:.4}", dia);
    }
    Ok(())
}

fn cmd_extract_edges(input: &Path, output: &Path) -> Result<(), String> {
    extract_edge_pairs_file(input, output)?;
    eprintln!("Extracted edge pairs -> {}", output.display());
    Ok(())
}
