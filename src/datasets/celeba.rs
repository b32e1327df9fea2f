use std::path::{Path, PathBuf};

use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::face::{FaceDetector, FaceRegion};
use super::table::{Attribute, AttributeTable};
use super::transforms::{crop_resize, scale_to_unit, signed_to_binary, write_pixels};
use super::{Batch, DatasetConvention, ImageShape, Partitions};
use crate::error::{DatasetError, Result};
use crate::report::{Reporter, TracingReporter};

/// Raw attribute annotations, inside the dataset directory
pub const ANNOTATION_FILE: &str = "list_attr_celeba.txt";

/// Labels the dataset knows how to train on
pub const SUPPORTED_LABELS: [Attribute; 2] = [Attribute::Smiling, Attribute::Male];

fn default_labels() -> Vec<Attribute> {
    SUPPORTED_LABELS.to_vec()
}

fn default_train_fraction() -> f64 {
    0.8
}

/// Main configuration parameters for the aligned face dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceDatasetParams {
    pub path: PathBuf,
    #[serde(default)]
    pub image_shape: ImageShape,
    /// The first label is the one batches are labelled with
    #[serde(default = "default_labels")]
    pub labels: Vec<Attribute>,
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    /// Seeds both the partition split and the batch order. None draws from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Fixed face location for pre-aligned images
    #[serde(default)]
    pub face_region: Option<FaceRegion>,
}

impl FaceDatasetParams {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            image_shape: ImageShape::default(),
            labels: default_labels(),
            train_fraction: default_train_fraction(),
            seed: None,
            face_region: None,
        }
    }

    pub fn image_shape(mut self, shape: ImageShape) -> Self {
        self.image_shape = shape;
        self
    }

    pub fn labels(mut self, labels: Vec<Attribute>) -> Self {
        self.labels = labels;
        self
    }

    pub fn train_fraction(mut self, fraction: f64) -> Self {
        self.train_fraction = fraction;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.path.is_dir() {
            return Err(DatasetError::DirectoryNotFound(self.path.clone()));
        }
        self.image_shape.validate()?;
        if self.labels.is_empty() {
            return Err(DatasetError::NoLabels);
        }
        let unsupported: Vec<Attribute> = self
            .labels
            .iter()
            .filter(|l| !SUPPORTED_LABELS.contains(l))
            .copied()
            .collect();
        if !unsupported.is_empty() {
            return Err(DatasetError::UnsupportedLabels(unsupported));
        }
        if !(0.0..=1.0).contains(&self.train_fraction) {
            return Err(DatasetError::InvalidFraction(self.train_fraction));
        }
        Ok(())
    }
}

/// Everything `load_dataset` produces. Train images are decoded lazily by the generator.
struct Loaded {
    partitions: Partitions,
    test_images: Option<Array4<f32>>,
    validation_images: Option<Array4<f32>>,
}

/// The aligned celebrity face dataset: an attribute annotation file plus one image per row.
pub struct FaceDataset {
    params: FaceDatasetParams,
    detector: Box<dyn FaceDetector>,
    reporter: Box<dyn Reporter>,
    loaded: Option<Loaded>,
}

impl FaceDataset {
    pub fn new<D: FaceDetector + 'static>(params: FaceDatasetParams, detector: D) -> Result<Self> {
        Self::from_boxed(params, Box::new(detector))
    }

    /// Like `new`, for a detector picked at runtime.
    pub fn from_boxed(params: FaceDatasetParams, detector: Box<dyn FaceDetector>) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            detector,
            reporter: Box::new(TracingReporter),
            loaded: None,
        })
    }

    pub fn with_reporter<R: Reporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn params(&self) -> &FaceDatasetParams {
        &self.params
    }

    pub fn image_shape(&self) -> &ImageShape {
        &self.params.image_shape
    }

    /// The label batches are labelled with
    pub fn primary_label(&self) -> Attribute {
        self.params.labels[0]
    }

    pub fn train_dataset(&self) -> Option<&AttributeTable> {
        self.loaded.as_ref().map(|l| &l.partitions.train)
    }

    pub fn test_dataset(&self) -> Option<&AttributeTable> {
        self.loaded.as_ref().map(|l| &l.partitions.test)
    }

    pub fn validation_dataset(&self) -> Option<&AttributeTable> {
        self.loaded.as_ref().and_then(|l| l.partitions.validation.as_ref())
    }

    pub fn test_images(&self) -> Option<&Array4<f32>> {
        self.loaded.as_ref().and_then(|l| l.test_images.as_ref())
    }

    pub fn validation_images(&self) -> Option<&Array4<f32>> {
        self.loaded.as_ref().and_then(|l| l.validation_images.as_ref())
    }

    fn rng(&self, stream: u64) -> StdRng {
        match self.params.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }

    /// Maps every configured label from {-1, +1} to {0, 1} on a copy of `table`.
    /// Columns that were already remapped are left alone.
    pub fn fix_labeling_issue(&self, table: &AttributeTable) -> AttributeTable {
        let mut output = table.clone();
        for &label in self.params.labels.iter() {
            if output.is_binary(label) {
                continue;
            }
            if !output.remap_to_binary(label, signed_to_binary) {
                self.reporter.warn(&format!("table has no {} column to fix", label));
            }
        }
        output
    }

    /// Infinite shuffled batches over the training table, reshuffled every epoch.
    pub fn generator_with_seed(&self, batch_size: usize, seed: u64) -> Result<BatchGenerator<'_>> {
        self.build_generator(batch_size, StdRng::seed_from_u64(seed))
    }

    fn build_generator(&self, batch_size: usize, rng: StdRng) -> Result<BatchGenerator<'_>> {
        if batch_size == 0 {
            return Err(DatasetError::InvalidBatchSize);
        }
        let train = self.train_dataset().ok_or(DatasetError::NotLoaded)?;
        let label = self.primary_label();
        if train.column_index(label).is_none() {
            return Err(DatasetError::MissingColumn(label));
        }
        Ok(BatchGenerator::new(self, train, label, batch_size, rng))
    }
}

impl DatasetConvention for FaceDataset {
    type Generator<'a> = BatchGenerator<'a>;

    fn dataset_dir(&self) -> &Path {
        &self.params.path
    }

    fn reporter(&self) -> &dyn Reporter {
        self.reporter.as_ref()
    }

    fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    fn load_dataset(&mut self) -> Result<()> {
        self.ensure_convention()?;
        let partitions = self.load_partitions()?;

        let partitions = Partitions {
            train: self.fix_labeling_issue(&partitions.train),
            test: self.fix_labeling_issue(&partitions.test),
            validation: partitions.validation.as_ref().map(|v| self.fix_labeling_issue(v)),
        };
        let test_images = self.load_images(&partitions.test);
        let validation_images = partitions
            .validation
            .as_ref()
            .and_then(|v| self.load_images(v));

        self.loaded = Some(Loaded { partitions, test_images, validation_images });
        Ok(())
    }

    fn load_images(&self, table: &AttributeTable) -> Option<Array4<f32>> {
        if table.is_empty() {
            return None;
        }
        let shape = self.params.image_shape;
        let mut output_images = Array4::<f32>::zeros(shape.batch_dim(table.len()));
        for (i, row) in table.rows().iter().enumerate() {
            let path = self.params.path.join(&row.file_location);
            let img = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    self.reporter
                        .warn(&format!("Unable to read images from {}: {}", path.display(), e));
                    continue;
                }
            };
            let faces = self.detector.detect(&img);
            let region = faces
                .first()
                .and_then(|f| f.clamp_to(img.width(), img.height()));
            if region.is_none() {
                self.reporter.warn(&format!(
                    "unable to find faces from: {} Loading full image as face",
                    path.display()
                ));
            }
            let face = crop_resize(&img, region, &shape);
            write_pixels(face, output_images.slice_mut(s![i, .., .., ..]));
        }
        Some(output_images)
    }

    fn ensure_convention(&mut self) -> Result<()> {
        if !self.params.path.is_dir() {
            return Err(DatasetError::DirectoryNotFound(self.params.path.clone()));
        }
        let mut rng = self.rng(0);
        self.build_caches(self.params.train_fraction, &mut rng)
    }

    fn build_full_table_from_source(&self) -> Result<AttributeTable> {
        AttributeTable::read_annotation(&self.params.path.join(ANNOTATION_FILE), self.reporter())
    }

    fn generator(&self, batch_size: usize) -> Result<BatchGenerator<'_>> {
        self.build_generator(batch_size, self.rng(1))
    }

    fn train_table(&self) -> Option<&AttributeTable> {
        self.train_dataset()
    }

    fn test_table(&self) -> Option<&AttributeTable> {
        self.test_dataset()
    }
}

/// Pulls one batch at a time from the training table. Never runs dry: once an epoch is
/// exhausted the row order is reshuffled and the next epoch starts. The last batch of an
/// epoch may be short.
pub struct BatchGenerator<'a> {
    dataset: &'a FaceDataset,
    train: &'a AttributeTable,
    label: Attribute,
    batch_size: usize,
    shuffle: Vec<usize>,
    idx: usize,
    epoch: usize,
    rng: StdRng,
}

impl<'a> BatchGenerator<'a> {
    fn new(
        dataset: &'a FaceDataset,
        train: &'a AttributeTable,
        label: Attribute,
        batch_size: usize,
        rng: StdRng,
    ) -> Self {
        let mut generator = Self {
            dataset,
            train,
            label,
            batch_size,
            shuffle: (0..train.len()).collect(),
            idx: 0,
            epoch: 0,
            rng,
        };
        generator.shuffle();
        generator
    }

    fn shuffle(&mut self) {
        self.shuffle.shuffle(&mut self.rng);
    }

    fn reset(&mut self) {
        self.idx = 0;
        self.epoch += 1;
    }

    /// Completed passes over the training table
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn batches_per_epoch(&self) -> usize {
        self.shuffle.len().div_ceil(self.batch_size)
    }
}

impl<'a> Iterator for BatchGenerator<'a> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.shuffle.is_empty() {
            return None;
        }
        if self.idx >= self.shuffle.len() {
            self.shuffle();
            self.reset();
        }
        let end = (self.idx + self.batch_size).min(self.shuffle.len());
        let rows = self.train.select(&self.shuffle[self.idx..end]);
        self.idx = end;

        let images = self.dataset.load_images(&rows)?;
        let labels = rows.column(self.label)?;
        Some(Batch { images: scale_to_unit(&images), labels })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.shuffle.is_empty() {
            (0, Some(0))
        } else {
            (usize::MAX, None)
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::fs;

    use image::{Rgb, RgbImage};

    use super::*;
    use crate::datasets::face::{FixedRegionDetector, NoFaceDetector};
    use crate::datasets::table::test::annotation_text;
    use crate::datasets::table::SampleRecord;
    use crate::datasets::{ALL_FILE, TEST_FILE, TRAIN_FILE, VALIDATION_FILE};
    use crate::report::MemoryReporter;
    use crate::Config;

    const FACE: FaceRegion = FaceRegion { left: 8, top: 6, right: 24, bottom: 22 };

    fn face_detector(_: &RgbImage) -> Vec<FaceRegion> {
        vec![FACE]
    }

    /// 32x28 grey image with a uniform face patch at FACE
    fn write_face(path: &Path, face: [u8; 3]) {
        let mut img = RgbImage::from_pixel(32, 28, Rgb([90, 90, 90]));
        for y in FACE.top as u32..FACE.bottom as u32 {
            for x in FACE.left as u32..FACE.right as u32 {
                img.put_pixel(x, y, Rgb(face));
            }
        }
        img.save(path).unwrap();
    }

    /// A raw dataset directory: n face images plus the annotation file.
    /// Row i is Smiling when i is even and Male when i is divisible by 3.
    fn raw_dataset(n: usize) -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        let mut rows = Vec::new();
        for i in 0..n {
            let name = format!("{:06}.png", i);
            write_face(&dir.path().join(&name), [200, 150, 100]);
            let mut values = [-1i8; 40];
            if i % 2 == 0 {
                values[Attribute::Smiling as usize] = 1;
            }
            if i % 3 == 0 {
                values[Attribute::Male as usize] = 1;
            }
            rows.push((name, values));
        }
        let rows: Vec<(&str, [i8; 40])> = rows.iter().map(|(n, v)| (n.as_str(), *v)).collect();
        fs::write(dir.path().join(ANNOTATION_FILE), annotation_text(&rows)).unwrap();
        dir
    }

    fn params(dir: &Path) -> FaceDatasetParams {
        FaceDatasetParams::new(dir)
            .image_shape(ImageShape::new(8, 8, 3))
            .seed(42)
    }

    fn files(table: &AttributeTable) -> HashSet<String> {
        table.rows().iter().map(|r| r.file_location.clone()).collect()
    }

    #[test]
    fn construction_validates_params() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            FaceDataset::new(FaceDatasetParams::new(&missing), NoFaceDetector),
            Err(DatasetError::DirectoryNotFound(_))
        ));
        assert!(matches!(
            FaceDataset::new(params(dir.path()).labels(vec![Attribute::Smiling, Attribute::Bald]), NoFaceDetector),
            Err(DatasetError::UnsupportedLabels(l)) if l == vec![Attribute::Bald]
        ));
        assert!(matches!(
            FaceDataset::new(params(dir.path()).labels(vec![]), NoFaceDetector),
            Err(DatasetError::NoLabels)
        ));
        assert!(matches!(
            FaceDataset::new(params(dir.path()).image_shape(ImageShape::new(8, 8, 2)), NoFaceDetector),
            Err(DatasetError::InvalidShape { .. })
        ));
        assert!(matches!(
            FaceDataset::new(params(dir.path()).train_fraction(1.5), NoFaceDetector),
            Err(DatasetError::InvalidFraction(_))
        ));
        assert!(FaceDataset::new(params(dir.path()), NoFaceDetector).is_ok());
    }

    #[test]
    fn params_from_ron() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("celeba.ron");
        fs::write(
            &path,
            format!(
                "(path: {:?}, image_shape: (height: 64, width: 64, channels: 1), labels: [Male], seed: Some(3))",
                dir.path()
            ),
        )
        .unwrap();
        let params = FaceDatasetParams::from_config_file(&path).unwrap();
        assert_eq!(params.image_shape, ImageShape::new(64, 64, 1));
        assert_eq!(params.labels, vec![Attribute::Male]);
        assert_eq!(params.train_fraction, 0.8);
        assert_eq!(params.seed, Some(3));
        assert_eq!(params.face_region, None);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn sample_config_parses() {
        let params = FaceDatasetParams::from_config_file(Path::new("assets/configs/datasets/celeba.ron")).unwrap();
        assert_eq!(params.image_shape, ImageShape::default());
        assert_eq!(params.labels, SUPPORTED_LABELS.to_vec());
        assert_eq!(params.face_region, Some(FaceRegion::new(25, 45, 153, 173)));
    }

    #[test]
    fn ensure_convention_builds_disjoint_partitions() {
        let dir = raw_dataset(60);
        let mut ds = FaceDataset::new(params(dir.path()), face_detector)
            .unwrap()
            .with_reporter(MemoryReporter::new());
        assert!(!ds.contains_required_files());
        ds.ensure_convention().unwrap();

        for file in [ALL_FILE, TRAIN_FILE, TEST_FILE, VALIDATION_FILE] {
            assert!(dir.path().join(file).exists(), "{} missing", file);
        }
        assert!(ds.contains_required_files());

        let all = ds.read_table(ALL_FILE).unwrap();
        let train = ds.read_table(TRAIN_FILE).unwrap();
        let test = ds.read_table(TEST_FILE).unwrap();
        let validation = ds.read_table(VALIDATION_FILE).unwrap();
        assert_eq!(all.len(), 60);
        assert_eq!(train.len() + test.len() + validation.len(), 60);

        let (tr, te, va) = (files(&train), files(&test), files(&validation));
        assert!(tr.is_disjoint(&te) && tr.is_disjoint(&va) && te.is_disjoint(&va));
        let union: HashSet<String> = tr.union(&te).chain(va.iter()).cloned().collect();
        assert_eq!(union, files(&all));
    }

    #[test]
    fn ensure_convention_reuses_full_table() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut all = AttributeTable::with_all_attributes();
        for i in 0..1000 {
            all.push(SampleRecord::new(format!("{}.png", i), vec![-1.0; 40])).unwrap();
        }
        all.write(&dir.path().join(ALL_FILE)).unwrap();

        let mut ds = FaceDataset::new(params(dir.path()), NoFaceDetector).unwrap();
        ds.ensure_convention().unwrap();
        let train = ds.read_table(TRAIN_FILE).unwrap();
        let test = ds.read_table(TEST_FILE).unwrap();
        let validation = ds.read_table(VALIDATION_FILE).unwrap();
        assert!((740..=860).contains(&train.len()), "train {}", train.len());
        assert!((50..=150).contains(&test.len()), "test {}", test.len());
        assert!((50..=150).contains(&validation.len()), "validation {}", validation.len());
        assert_eq!(ds.read_table(ALL_FILE).unwrap(), all);
    }

    #[test]
    fn load_without_source_or_cache_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut ds = FaceDataset::new(params(dir.path()), NoFaceDetector)
            .unwrap()
            .with_reporter(MemoryReporter::new());
        assert!(matches!(
            ds.load_partitions(),
            Err(DatasetError::MissingCache { file: ALL_FILE, .. })
        ));
        assert!(matches!(ds.load_dataset(), Err(DatasetError::Io { .. })));
        assert!(!ds.is_loaded());
        assert!(!ds.has_met_convention().unwrap());
    }

    #[test]
    fn load_dataset_then_reload_from_cache() {
        let dir = raw_dataset(40);
        let reporter = MemoryReporter::new();
        let mut ds = FaceDataset::new(params(dir.path()), face_detector)
            .unwrap()
            .with_reporter(reporter.clone());
        ds.load_dataset().unwrap();
        assert!(ds.is_loaded());
        assert!(reporter.warnings().is_empty(), "{:?}", reporter.warnings());

        let test = ds.test_dataset().unwrap();
        let images = ds.test_images();
        match images {
            Some(images) => assert_eq!(images.dim(), (test.len(), 8, 8, 3)),
            None => assert!(test.is_empty()),
        }
        assert_eq!(
            ds.validation_images().map(|v| v.dim().0),
            ds.validation_dataset().filter(|v| !v.is_empty()).map(|v| v.len())
        );

        let train_before = ds.train_dataset().unwrap().clone();
        let test_before = test.clone();

        let mut again = FaceDataset::new(params(dir.path()).seed(7), face_detector).unwrap();
        again.load_dataset().unwrap();
        assert_eq!(again.train_dataset().unwrap(), &train_before);
        assert_eq!(again.test_dataset().unwrap(), &test_before);

        ds.load_dataset().unwrap();
        assert_eq!(ds.train_dataset().unwrap(), &train_before);
        assert!(ds.has_met_convention().unwrap());
    }

    #[test]
    fn missing_validation_is_a_warning() {
        let dir = raw_dataset(20);
        let reporter = MemoryReporter::new();
        let mut ds = FaceDataset::new(params(dir.path()), face_detector)
            .unwrap()
            .with_reporter(reporter.clone());
        ds.ensure_convention().unwrap();
        fs::remove_file(dir.path().join(VALIDATION_FILE)).unwrap();

        ds.load_dataset().unwrap();
        assert!(ds.validation_dataset().is_none());
        assert!(ds.validation_images().is_none());
        assert!(reporter
            .warnings()
            .iter()
            .any(|e| e.message.contains("validation")));
    }

    #[test]
    fn unreadable_table_fails_convention() {
        let dir = raw_dataset(10);
        let reporter = MemoryReporter::new();
        let mut ds = FaceDataset::new(params(dir.path()), face_detector)
            .unwrap()
            .with_reporter(reporter.clone());
        ds.ensure_convention().unwrap();
        fs::write(dir.path().join(TRAIN_FILE), "(columns: [Smiling], rows: [(values: [1.0])])").unwrap();

        assert!(!ds.has_met_convention().unwrap());
        assert!(!ds.is_loaded());
        assert!(!reporter.warnings().is_empty());
    }

    #[test]
    fn short_cached_row_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let short = "(columns: [Smiling, Male], rows: [(file_location: \"a.png\", values: [1.0])])";
        for file in [ALL_FILE, TRAIN_FILE, TEST_FILE] {
            fs::write(dir.path().join(file), short).unwrap();
        }
        let reporter = MemoryReporter::new();
        let mut ds = FaceDataset::new(params(dir.path()), NoFaceDetector)
            .unwrap()
            .with_reporter(reporter.clone());

        assert!(matches!(
            ds.load_dataset(),
            Err(DatasetError::CorruptCache { row: 1, .. })
        ));
        assert!(!ds.is_loaded());
        assert!(!ds.has_met_convention().unwrap());
        assert!(reporter
            .warnings()
            .iter()
            .any(|e| e.message.contains("unreadable")));
    }

    #[test]
    fn empty_file_location_fails_convention() {
        let dir = raw_dataset(10);
        let reporter = MemoryReporter::new();
        let mut ds = FaceDataset::new(params(dir.path()), face_detector)
            .unwrap()
            .with_reporter(reporter.clone());
        ds.ensure_convention().unwrap();
        let mut train = AttributeTable::with_all_attributes();
        train.push(SampleRecord::new("", vec![-1.0; 40])).unwrap();
        train.write(&dir.path().join(TRAIN_FILE)).unwrap();

        assert!(!ds.has_met_convention().unwrap());
        assert!(ds.is_loaded());
        assert!(reporter
            .warnings()
            .iter()
            .any(|e| e.message.contains("training dataset does not contain file_location")));
    }

    #[test]
    fn boxed_detector_crops_face() {
        let dir = tempfile::TempDir::new().unwrap();
        write_face(&dir.path().join("face.png"), [200, 150, 100]);
        let detector: Box<dyn FaceDetector> = Box::new(FixedRegionDetector::new(FACE));
        let reporter = MemoryReporter::new();
        let ds = FaceDataset::from_boxed(params(dir.path()).image_shape(ImageShape::new(4, 4, 3)), detector)
            .unwrap()
            .with_reporter(reporter.clone());

        let mut table = AttributeTable::new(vec![Attribute::Smiling]);
        table.push(SampleRecord::new("face.png", vec![1.0])).unwrap();
        let images = ds.load_images(&table).unwrap();
        assert!(images.slice(s![.., .., .., 0]).iter().all(|&v| v == 200.0));
        assert!(reporter.events().is_empty());

        assert!(matches!(
            FaceDataset::from_boxed(FaceDatasetParams::new(dir.path().join("nope")), Box::new(NoFaceDetector)),
            Err(DatasetError::DirectoryNotFound(_))
        ));
    }

    #[test]
    fn fix_labeling_issue_leaves_input_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        let ds = FaceDataset::new(params(dir.path()), NoFaceDetector).unwrap();
        let mut table = AttributeTable::new(vec![Attribute::Smiling, Attribute::Male, Attribute::Young]);
        table.push(SampleRecord::new("a.png", vec![-1.0, 1.0, -1.0])).unwrap();
        table.push(SampleRecord::new("b.png", vec![1.0, -1.0, 1.0])).unwrap();
        let before = table.clone();

        let fixed = ds.fix_labeling_issue(&table);
        assert_eq!(table, before);
        assert_eq!(fixed.column(Attribute::Smiling).unwrap().to_vec(), vec![0.0, 1.0]);
        assert_eq!(fixed.column(Attribute::Male).unwrap().to_vec(), vec![1.0, 0.0]);
        assert_eq!(fixed.column(Attribute::Young).unwrap().to_vec(), vec![-1.0, 1.0]);

        assert_eq!(ds.fix_labeling_issue(&fixed), fixed);
    }

    #[test]
    fn load_images_crops_detected_face() {
        let dir = tempfile::TempDir::new().unwrap();
        write_face(&dir.path().join("face.png"), [200, 150, 100]);
        let reporter = MemoryReporter::new();
        let ds = FaceDataset::new(params(dir.path()).image_shape(ImageShape::new(6, 5, 3)), face_detector)
            .unwrap()
            .with_reporter(reporter.clone());

        let mut table = AttributeTable::new(vec![Attribute::Smiling]);
        table.push(SampleRecord::new("face.png", vec![1.0])).unwrap();
        let images = ds.load_images(&table).unwrap();
        assert_eq!(images.dim(), (1, 6, 5, 3));
        assert_eq!(images.slice(s![0, 3, 2, ..]).to_vec(), vec![200.0, 150.0, 100.0]);
        assert!(images.slice(s![.., .., .., 0]).iter().all(|&v| v == 200.0));
        assert!(reporter.events().is_empty());

        assert!(ds.load_images(&AttributeTable::new(vec![Attribute::Smiling])).is_none());
    }

    #[test]
    fn load_images_recovers_from_bad_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        write_face(&dir.path().join("face.png"), [200, 150, 100]);
        fs::write(dir.path().join("broken.png"), b"not an image").unwrap();
        let reporter = MemoryReporter::new();
        let ds = FaceDataset::new(params(dir.path()).image_shape(ImageShape::new(4, 4, 1)), NoFaceDetector)
            .unwrap()
            .with_reporter(reporter.clone());

        let mut table = AttributeTable::new(vec![Attribute::Smiling]);
        table.push(SampleRecord::new("broken.png", vec![1.0])).unwrap();
        table.push(SampleRecord::new("face.png", vec![1.0])).unwrap();
        table.push(SampleRecord::new("missing.png", vec![1.0])).unwrap();

        let images = ds.load_images(&table).unwrap();
        assert_eq!(images.dim(), (3, 4, 4, 1));
        assert!(images.slice(s![0, .., .., ..]).iter().all(|&v| v == 0.0));
        assert!(images.slice(s![2, .., .., ..]).iter().all(|&v| v == 0.0));
        assert!(images.slice(s![1, .., .., ..]).iter().any(|&v| v > 0.0));

        let warnings = reporter.warnings();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].message.contains("broken.png"));
        assert!(warnings[1].message.contains("Loading full image"));
        assert!(warnings[2].message.contains("missing.png"));
    }

    /// Train table of `n` rows where image i is a uniform (i, 0, 0) square and
    /// Smiling alternates -1/+1.
    fn indexed_dataset(n: usize) -> (tempfile::TempDir, FaceDataset) {
        let dir = tempfile::TempDir::new().unwrap();
        let mut all = AttributeTable::with_all_attributes();
        for i in 0..n {
            let name = format!("{}.png", i);
            RgbImage::from_pixel(4, 4, Rgb([i as u8, 0, 0]))
                .save(dir.path().join(&name))
                .unwrap();
            let mut values = vec![-1.0; 40];
            values[Attribute::Smiling as usize] = if i % 2 == 0 { 1.0 } else { -1.0 };
            all.push(SampleRecord::new(name, values)).unwrap();
        }
        all.write(&dir.path().join(ALL_FILE)).unwrap();
        all.write(&dir.path().join(TRAIN_FILE)).unwrap();
        all.select(&[0]).write(&dir.path().join(TEST_FILE)).unwrap();
        all.select(&[1]).write(&dir.path().join(VALIDATION_FILE)).unwrap();

        let mut ds = FaceDataset::new(params(dir.path()).image_shape(ImageShape::new(4, 4, 3)), NoFaceDetector)
            .unwrap()
            .with_reporter(MemoryReporter::new());
        ds.load_dataset().unwrap();
        (dir, ds)
    }

    fn image_ids(batch: &Batch) -> Vec<usize> {
        (0..batch.len())
            .map(|b| (batch.images[[b, 0, 0, 0]] * 255.0).round() as usize)
            .collect()
    }

    #[test]
    fn generator_covers_each_epoch_once() {
        let (_dir, ds) = indexed_dataset(100);
        let mut generator = ds.generator_with_seed(32, 5).unwrap();
        assert_eq!(generator.batches_per_epoch(), 4);

        let mut orders = Vec::new();
        for epoch in 0..3 {
            let batches: Vec<Batch> = generator.by_ref().take(4).collect();
            assert_eq!(generator.epoch(), epoch);
            let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
            assert_eq!(sizes, vec![32, 32, 32, 4]);

            let mut order = Vec::new();
            for batch in batches.iter() {
                assert_eq!(batch.images.dim(), (batch.len(), 4, 4, 3));
                assert!(batch.images.iter().all(|&v| (0.0..=1.0).contains(&v)));
                assert!(batch.labels.iter().all(|&l| l == 0.0 || l == 1.0));
                let ids = image_ids(batch);
                for (id, label) in ids.iter().zip(batch.labels.iter()) {
                    assert_eq!(*label, if id % 2 == 0 { 1.0 } else { 0.0 });
                }
                order.extend(ids);
            }
            let mut sorted = order.clone();
            sorted.sort();
            assert_eq!(sorted, (0..100).collect::<Vec<_>>());
            orders.push(order);
        }
        assert!(orders[0] != orders[1] || orders[1] != orders[2]);

        assert!(generator.next().is_some());
        assert_eq!(generator.epoch(), 3);
    }

    #[test]
    fn generator_is_reproducible_with_seed() {
        let (_dir, ds) = indexed_dataset(10);
        let a: Vec<Vec<usize>> = ds.generator_with_seed(3, 9).unwrap().take(8).map(|b| image_ids(&b)).collect();
        let b: Vec<Vec<usize>> = ds.generator_with_seed(3, 9).unwrap().take(8).map(|b| image_ids(&b)).collect();
        assert_eq!(a, b);
        assert_eq!(a.iter().map(|x| x.len()).collect::<Vec<_>>(), vec![3, 3, 3, 1, 3, 3, 3, 1]);

        let c: Vec<Vec<usize>> = ds.generator(3).unwrap().take(4).map(|b| image_ids(&b)).collect();
        assert_eq!(c.concat().len(), 10);
    }

    #[test]
    fn generator_requires_loaded_dataset() {
        let dir = tempfile::TempDir::new().unwrap();
        let ds = FaceDataset::new(params(dir.path()), NoFaceDetector).unwrap();
        assert!(matches!(ds.generator(32), Err(DatasetError::NotLoaded)));

        let (_dir, ds) = indexed_dataset(4);
        assert!(matches!(ds.generator(0), Err(DatasetError::InvalidBatchSize)));
    }

    #[test]
    fn generator_over_empty_training_table_stops() {
        let (dir, _) = indexed_dataset(2);
        AttributeTable::with_all_attributes()
            .write(&dir.path().join(TRAIN_FILE))
            .unwrap();
        let mut ds = FaceDataset::new(params(dir.path()), NoFaceDetector)
            .unwrap()
            .with_reporter(MemoryReporter::new());
        ds.load_dataset().unwrap();
        let mut generator = ds.generator(4).unwrap();
        assert_eq!(generator.size_hint(), (0, Some(0)));
        assert!(generator.next().is_none());
    }
}
