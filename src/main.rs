use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use faceset_lib::{
    Config, DatasetConvention, FaceDataset, FaceDatasetParams, FaceDetector, FixedRegionDetector,
    NoFaceDetector,
};

#[derive(Parser)]
#[command(name = "faceset", about = "Prepare face attribute datasets and pull training batches")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the cached partitions if they are missing
    Prepare { config: PathBuf },
    /// Load the dataset and print partition sizes and label balance
    Inspect { config: PathBuf },
    /// Pull batches from the training generator
    Batches {
        config: PathBuf,
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
        #[arg(long, default_value_t = 4)]
        count: usize,
    },
}

fn open(config: &Path) -> Result<FaceDataset> {
    let params = FaceDatasetParams::from_config_file(config)?;
    tracing::debug!("dataset params:\n{}", params.config()?);
    let detector: Box<dyn FaceDetector> = match params.face_region {
        Some(region) => Box::new(FixedRegionDetector::new(region)),
        None => Box::new(NoFaceDetector),
    };
    let dataset = FaceDataset::from_boxed(params, detector)?;
    Ok(dataset)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("faceset=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Prepare { config } => {
            let mut dataset = open(&config)?;
            dataset.ensure_convention().context("building dataset caches")?;
            let partitions = dataset.load_partitions()?;
            println!(
                "train: {}  test: {}  validation: {}",
                partitions.train.len(),
                partitions.test.len(),
                partitions.validation.map_or(0, |v| v.len())
            );
        }
        Command::Inspect { config } => {
            let mut dataset = open(&config)?;
            dataset.load_dataset().context("loading dataset")?;
            let tables = [
                ("train", dataset.train_dataset()),
                ("test", dataset.test_dataset()),
                ("validation", dataset.validation_dataset()),
            ];
            for (name, table) in tables {
                let table = match table {
                    Some(t) => t,
                    None => {
                        println!("{:<10} missing", name);
                        continue;
                    }
                };
                print!("{:<10} {:>7} rows", name, table.len());
                for label in dataset.params().labels.iter() {
                    if let Some(column) = table.column(*label) {
                        print!("  {}: {:.3}", label, column.mean().unwrap_or(0.0));
                    }
                }
                println!();
            }
        }
        Command::Batches { config, batch_size, count } => {
            let mut dataset = open(&config)?;
            dataset.load_dataset().context("loading dataset")?;
            let generator = dataset.generator(batch_size)?;
            for (i, batch) in generator.take(count).enumerate() {
                let min = batch.images.iter().cloned().fold(f32::INFINITY, f32::min);
                let max = batch.images.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                println!(
                    "batch {}: images {:?} in [{:.3}, {:.3}], {} positive",
                    i,
                    batch.images.dim(),
                    min,
                    max,
                    batch.labels.iter().filter(|&&l| l > 0.5).count()
                );
            }
        }
    }
    Ok(())
}
