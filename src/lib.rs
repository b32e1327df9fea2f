//! Face attribute dataset preparation: cached train/test/validation partitions of an
//! annotated face image directory, face cropping, and an endless shuffled batch generator.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

pub mod datasets;
pub mod error;
pub mod report;

pub use datasets::celeba::{BatchGenerator, FaceDataset, FaceDatasetParams};
pub use datasets::face::{FaceDetector, FaceRegion, FixedRegionDetector, NoFaceDetector};
pub use datasets::table::{Attribute, AttributeTable, SampleRecord};
pub use datasets::{Batch, DatasetConvention, ImageShape, Partitions};
pub use error::DatasetError;
pub use report::{MemoryReporter, Reporter, Severity, TracingReporter};

pub trait Config {
    fn config(&self) -> Result<String>;
    fn load_config(&mut self, config: &str) -> Result<()>;
    fn from_config_file(path: &Path) -> Result<Self>
    where
        Self: Sized;
}

impl<T: Serialize + DeserializeOwned> Config for T {
    fn config(&self) -> Result<String> {
        ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .context("Failed to serialize config")
    }
    fn load_config(&mut self, config: &str) -> Result<()> {
        *self = ron::from_str(config).context(format!("Failed to load config {}", config))?;
        Ok(())
    }
    fn from_config_file(path: &Path) -> Result<Self> {
        let serialized = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        ron::from_str(&serialized).with_context(|| format!("Failed to load config {}", path.display()))
    }
}

#[test]
fn config_round_trip() {
    let params = FaceDatasetParams::new("assets/celeba").seed(4);
    let serialized = params.config().unwrap();

    let mut loaded = FaceDatasetParams::new("elsewhere");
    loaded.load_config(&serialized).unwrap();
    assert_eq!(loaded, params);
    assert!(loaded.load_config("(path: 3)").is_err());
}
