use std::{path::PathBuf, process::Command};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use soft_teacher::{
    backend::{create_device, get_backend_name, SelectedAutodiffBackend, SelectedBackend},
    evaluate, evaluate_with_gradients,
    logging::init_logging,
    loss::{BoxClassificationLossConfig, ClassificationLossKind, SoftTeacherLossConfig},
    parse_classification_loss, BoxBatch, ExperimentConfig, Network,
};

#[derive(Parser)]
#[command(name = "soft-teacher")]
#[command(about = "Soft-Teacher: semi-supervised Faster R-CNN classification losses")]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an experiment configuration and print or save it
    Config(ConfigArgs),

    /// Evaluate the semi-supervised classification loss on a box batch
    Evaluate {
        /// JSON file holding a box batch
        #[arg(short, long)]
        batch: PathBuf,

        /// Experiment configuration file (defaults are used when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also report the gradient norm of the loss for every box's logits
        #[arg(short, long)]
        gradients: bool,
    },

    /// Show backend information
    Info,
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long, default_value_t = 2)]
    batch_size: usize,

    /// Backbone network: resnet50, efficient_net_v2 or mobile_net_v3
    #[arg(long, default_value_t = Network::Resnet50)]
    backbone: Network,

    #[arg(long, default_value_t = 800)]
    min_image_size: usize,

    #[arg(long, default_value_t = 1066)]
    max_image_size: usize,

    #[arg(long)]
    freeze_backbone: bool,

    /// Classification loss: cross_entropy or focal_loss
    #[arg(
        long,
        default_value_t = ClassificationLossKind::CrossEntropy,
        value_parser = parse_classification_loss
    )]
    classification_loss_function: ClassificationLossKind,

    #[arg(long, default_value_t = 1.0)]
    unsupervised_loss_weight: f64,

    /// Student confidence needed to keep a pseudo-labeled foreground box
    #[arg(long, default_value_t = 0.9)]
    foreground_threshold: f64,

    /// Count unconfident pseudo-labeled foreground boxes as background
    #[arg(long)]
    uncertain_foreground_as_background: bool,

    /// Average the reliability-weighted background losses instead of summing them
    #[arg(long)]
    reliability_mean_reduction: bool,

    /// Write the configuration here instead of printing it
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl ConfigArgs {
    fn into_config(self) -> ExperimentConfig {
        ExperimentConfig::new()
            .with_batch_size(self.batch_size)
            .with_backbone(self.backbone)
            .with_min_image_size(self.min_image_size)
            .with_max_image_size(self.max_image_size)
            .with_freeze_backbone(self.freeze_backbone)
            .with_classification_loss(
                BoxClassificationLossConfig::new().with_kind(self.classification_loss_function),
            )
            .with_soft_teacher(
                SoftTeacherLossConfig::new()
                    .with_unsupervised_loss_weight(self.unsupervised_loss_weight)
                    .with_foreground_threshold(self.foreground_threshold)
                    .with_uncertain_foreground_as_background(
                        self.uncertain_foreground_as_background,
                    )
                    .with_reliability_mean_reduction(self.reliability_mean_reduction),
            )
    }
}

/// Short hash of the checked-out commit, or `unknown` outside a git repository.
fn git_revision() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|revision| revision.trim().to_owned())
        .filter(|revision| !revision.is_empty())
        .unwrap_or_else(|| "unknown".to_owned())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Config(args) => {
            let output = args.output.clone();
            let config = args.into_config();
            config.validate()?;
            config.log_start(&config.experiment_name(&git_revision()));

            match output {
                Some(path) => {
                    config.write_to(&path)?;
                    tracing::info!(path = %path.display(), "configuration saved");
                }
                None => println!("{}", serde_json::to_string_pretty(&config)?),
            }
            Ok(())
        }

        Commands::Evaluate {
            batch,
            config,
            gradients,
        } => {
            let config = match config {
                Some(path) => {
                    tracing::info!(config = %path.display(), "loading experiment configuration");
                    ExperimentConfig::from_file(&path)?
                }
                None => ExperimentConfig::new(),
            };
            config.log_start(&config.experiment_name(&git_revision()));

            tracing::info!(batch = %batch.display(), "loading box batch");
            let batch = BoxBatch::from_file(&batch)?;

            let device = create_device();
            tracing::info!(backend = get_backend_name(), "evaluating on backend");
            let report = if gradients {
                evaluate_with_gradients::<SelectedAutodiffBackend>(&config, &batch, &device)?
            } else {
                evaluate::<SelectedBackend>(&config, &batch, &device)?
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Commands::Info => {
            println!("Soft-Teacher Information:");
            println!("  Backend: {}", get_backend_name());
            println!("  Device: {:?}", create_device());
            Ok(())
        }
    }
}
