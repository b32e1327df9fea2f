//! This module only defines the dataset logic for loading and processing datasets.
//!
//! Conventions
//! - Every table references its images relative to the dataset directory.
//! - `all.ron` holds the full table, `train.ron` and `test.ron` the partitions built from it.
//!   `validation.ron` is optional. When the cached tables are missing the dataset builds them
//!   once, from `all.ron` if present, otherwise from the raw annotation file.
use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod celeba;
pub mod face;
pub mod table;
pub mod transforms;

use crate::error::{DatasetError, Result};
use crate::report::Reporter;
use table::AttributeTable;

pub const ALL_FILE: &str = "all.ron";
pub const TRAIN_FILE: &str = "train.ron";
pub const TEST_FILE: &str = "test.ron";
pub const VALIDATION_FILE: &str = "validation.ron";

/// Shape of a single image handed to the network, [H, W, C]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Default for ImageShape {
    fn default() -> Self {
        Self { height: 227, width: 227, channels: 3 }
    }
}

impl ImageShape {
    pub fn new(height: usize, width: usize, channels: usize) -> Self {
        Self { height, width, channels }
    }

    /// Height and width must fit an image dimension (u32), channels must be 1 or 3.
    pub fn validate(&self) -> Result<()> {
        let fits = |d: usize| d > 0 && u32::try_from(d).is_ok();
        if !fits(self.height) || !fits(self.width) || !(self.channels == 1 || self.channels == 3) {
            return Err(DatasetError::InvalidShape {
                height: self.height,
                width: self.width,
                channels: self.channels,
            });
        }
        Ok(())
    }

    /// [n, H, W, C]
    pub fn batch_dim(&self, n: usize) -> (usize, usize, usize, usize) {
        (n, self.height, self.width, self.channels)
    }
}

/// One mini-batch: images scaled into [0, 1] with shape [B, H, W, C] and the primary label.
#[derive(Clone, Debug)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Array1<f32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// The train, test and optional validation tables of a dataset directory.
#[derive(Clone, Debug, PartialEq)]
pub struct Partitions {
    pub train: AttributeTable,
    pub test: AttributeTable,
    pub validation: Option<AttributeTable>,
}

/// The on-disk contract every dataset directory follows. Implementors supply the
/// dataset specific steps: parsing the raw annotations, decoding images and batching.
pub trait DatasetConvention {
    type Generator<'a>: Iterator<Item = Batch>
    where
        Self: 'a;

    fn dataset_dir(&self) -> &Path;

    fn reporter(&self) -> &dyn Reporter;

    fn is_loaded(&self) -> bool;

    /// Makes the directory meet the convention, then loads every partition.
    /// Sets the loaded flag on success.
    fn load_dataset(&mut self) -> Result<()>;

    /// Decodes the images referenced by `table` into [rows, H, W, C], or None for no rows.
    fn load_images(&self, table: &AttributeTable) -> Option<Array4<f32>>;

    /// Builds the cached tables if any are missing.
    fn ensure_convention(&mut self) -> Result<()>;

    /// Parses the raw annotation source into the full table.
    fn build_full_table_from_source(&self) -> Result<AttributeTable>;

    fn generator(&self, batch_size: usize) -> Result<Self::Generator<'_>>;

    fn train_table(&self) -> Option<&AttributeTable>;

    fn test_table(&self) -> Option<&AttributeTable>;

    fn cache_path(&self, file: &str) -> PathBuf {
        self.dataset_dir().join(file)
    }

    /// The first of the required cache files that is absent, if any.
    fn missing_cache_file(&self) -> Option<&'static str> {
        [ALL_FILE, TRAIN_FILE, TEST_FILE]
            .into_iter()
            .find(|f| !self.cache_path(f).exists())
    }

    /// Checks that `all`, `train` and `test` are cached, reporting the first one missing.
    fn contains_required_files(&self) -> bool {
        match self.missing_cache_file() {
            Some(file) => {
                self.reporter().info(&format!(
                    "Failed to meet convention, {} is not inside: {}",
                    file,
                    self.dataset_dir().display()
                ));
                false
            }
            None => true,
        }
    }

    /// Loads one cached table.
    fn read_table(&self, file: &str) -> Result<AttributeTable> {
        AttributeTable::read(&self.cache_path(file))
    }

    /// Loads the cached partitions without building anything.
    fn load_partitions(&self) -> Result<Partitions> {
        let dir = self.dataset_dir();
        if !dir.is_dir() {
            return Err(DatasetError::DirectoryNotFound(dir.to_path_buf()));
        }
        if let Some(file) = self.missing_cache_file() {
            return Err(DatasetError::MissingCache { file, dir: dir.to_path_buf() });
        }
        let train = self.read_table(TRAIN_FILE)?;
        let test = self.read_table(TEST_FILE)?;
        let validation = if self.cache_path(VALIDATION_FILE).exists() {
            Some(self.read_table(VALIDATION_FILE)?)
        } else {
            self.reporter().warn("Unable to find validation dataset");
            None
        };
        tracing::debug!(
            train = train.len(),
            test = test.len(),
            validation = validation.as_ref().map_or(0, |v| v.len()),
            "loaded cached partitions from {}",
            dir.display()
        );
        Ok(Partitions { train, test, validation })
    }

    /// Writes `all`, `train`, `test` and `validation` unless the required ones are cached.
    /// The full table is taken from `all.ron` when present, else from the raw source.
    fn build_caches<R: Rng + ?Sized>(&self, train_fraction: f64, rng: &mut R) -> Result<()> {
        if self.contains_required_files() {
            return Ok(());
        }
        let all_path = self.cache_path(ALL_FILE);
        let full = if all_path.exists() {
            self.read_table(ALL_FILE)?
        } else {
            let full = self.build_full_table_from_source()?;
            full.write(&all_path)?;
            full
        };
        let (train, test, validation) = self.split_three_way(&full, train_fraction, rng);
        train.write(&self.cache_path(TRAIN_FILE))?;
        test.write(&self.cache_path(TEST_FILE))?;
        validation.write(&self.cache_path(VALIDATION_FILE))?;
        tracing::info!(
            all = full.len(),
            train = train.len(),
            test = test.len(),
            validation = validation.len(),
            "built dataset caches in {}",
            self.dataset_dir().display()
        );
        Ok(())
    }

    /// True once the cached tables exist, load and carry their path column.
    fn has_met_convention(&mut self) -> Result<bool> {
        if !self.contains_required_files() {
            return Ok(false);
        }
        if !self.is_loaded() {
            match self.load_dataset() {
                Ok(()) => {}
                Err(e @ (DatasetError::Deserialize { .. } | DatasetError::CorruptCache { .. })) => {
                    self.reporter()
                        .warn(&format!("Failed to meet convention, cached table is unreadable: {}", e));
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        for (name, table) in [("training", self.train_table()), ("test", self.test_table())] {
            if !table.map_or(false, |t| t.has_path_column()) {
                self.reporter().warn(&format!(
                    "Failed to meet convention, {} dataset does not contain file_location column",
                    name
                ));
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Independent Bernoulli draw per row: each row lands in the first table with
    /// probability `train_fraction`. Sizes are only approximately proportional.
    fn split<R: Rng + ?Sized>(
        &self,
        table: &AttributeTable,
        train_fraction: f64,
        rng: &mut R,
    ) -> (AttributeTable, AttributeTable) {
        split(table, train_fraction, rng)
    }

    /// Splits off the train rows, then halves the remainder into test and validation.
    fn split_three_way<R: Rng + ?Sized>(
        &self,
        table: &AttributeTable,
        train_fraction: f64,
        rng: &mut R,
    ) -> (AttributeTable, AttributeTable, AttributeTable) {
        split_three_way(table, train_fraction, rng)
    }
}

pub fn split<R: Rng + ?Sized>(
    table: &AttributeTable,
    train_fraction: f64,
    rng: &mut R,
) -> (AttributeTable, AttributeTable) {
    let mask: Vec<bool> = (0..table.len())
        .map(|_| rng.gen::<f64>() < train_fraction)
        .collect();
    table.partition_by_mask(&mask)
}

pub fn split_three_way<R: Rng + ?Sized>(
    table: &AttributeTable,
    train_fraction: f64,
    rng: &mut R,
) -> (AttributeTable, AttributeTable, AttributeTable) {
    let (train, rest) = split(table, train_fraction, rng);
    let (test, validation) = split(&rest, 0.5, rng);
    (train, test, validation)
}
