/////////////////////////////////////////////////////////////////////////////////////////
//! Attribute tables: one row per image, a relative file location plus the 40 attribute
//! columns of the annotation file. Tables are cached in the dataset directory as ron.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use itertools::Itertools;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString, IntoEnumIterator};

use crate::error::{DatasetError, Result};
use crate::report::Reporter;

/// The attribute columns of the annotation file, in file order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash,
    Serialize, Deserialize, Display, EnumString, EnumIter, EnumCount, AsRefStr,
)]
pub enum Attribute {
    #[strum(to_string = "5_o_Clock_Shadow")]
    FiveOClockShadow,
    #[strum(to_string = "Arched_Eyebrows")]
    ArchedEyebrows,
    Attractive,
    #[strum(to_string = "Bags_Under_Eyes")]
    BagsUnderEyes,
    Bald,
    Bangs,
    #[strum(to_string = "Big_Lips")]
    BigLips,
    #[strum(to_string = "Big_Nose")]
    BigNose,
    #[strum(to_string = "Black_Hair")]
    BlackHair,
    #[strum(to_string = "Blond_Hair")]
    BlondHair,
    Blurry,
    #[strum(to_string = "Brown_Hair")]
    BrownHair,
    #[strum(to_string = "Bushy_Eyebrows")]
    BushyEyebrows,
    Chubby,
    #[strum(to_string = "Double_Chin")]
    DoubleChin,
    Eyeglasses,
    Goatee,
    #[strum(to_string = "Gray_Hair")]
    GrayHair,
    #[strum(to_string = "Heavy_Makeup")]
    HeavyMakeup,
    #[strum(to_string = "High_Cheekbones")]
    HighCheekbones,
    Male,
    #[strum(to_string = "Mouth_Slightly_Open")]
    MouthSlightlyOpen,
    Mustache,
    #[strum(to_string = "Narrow_Eyes")]
    NarrowEyes,
    #[strum(to_string = "No_Beard")]
    NoBeard,
    #[strum(to_string = "Oval_Face")]
    OvalFace,
    #[strum(to_string = "Pale_Skin")]
    PaleSkin,
    #[strum(to_string = "Pointy_Nose")]
    PointyNose,
    #[strum(to_string = "Receding_Hairline")]
    RecedingHairline,
    #[strum(to_string = "Rosy_Cheeks")]
    RosyCheeks,
    Sideburns,
    Smiling,
    #[strum(to_string = "Straight_Hair")]
    StraightHair,
    #[strum(to_string = "Wavy_Hair")]
    WavyHair,
    #[strum(to_string = "Wearing_Earrings")]
    WearingEarrings,
    #[strum(to_string = "Wearing_Hat")]
    WearingHat,
    #[strum(to_string = "Wearing_Lipstick")]
    WearingLipstick,
    #[strum(to_string = "Wearing_Necklace")]
    WearingNecklace,
    #[strum(to_string = "Wearing_Necktie")]
    WearingNecktie,
    Young,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Image path relative to the dataset directory
    pub file_location: String,
    /// One value per table column
    pub values: Vec<f32>,
}

impl SampleRecord {
    pub fn new(file_location: impl Into<String>, values: Vec<f32>) -> Self {
        Self { file_location: file_location.into(), values }
    }
}

/// An ordered collection of sample records sharing the same attribute columns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeTable {
    columns: Vec<Attribute>,
    rows: Vec<SampleRecord>,
    /// columns already remapped from {-1, +1} to {0, 1}
    #[serde(default)]
    binary: BTreeSet<Attribute>,
}

impl AttributeTable {
    pub fn new(columns: Vec<Attribute>) -> Self {
        Self { columns, rows: Vec::new(), binary: BTreeSet::new() }
    }

    /// A table over every annotation attribute, in file order.
    pub fn with_all_attributes() -> Self {
        Self::new(Attribute::iter().collect())
    }

    pub fn push(&mut self, record: SampleRecord) -> Result<()> {
        if record.values.len() != self.columns.len() {
            return Err(DatasetError::Annotation {
                line: self.rows.len() + 1,
                reason: format!(
                    "{} has {} values, expected {}",
                    record.file_location,
                    record.values.len(),
                    self.columns.len()
                ),
            });
        }
        self.rows.push(record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[Attribute] {
        &self.columns
    }

    pub fn rows(&self) -> &[SampleRecord] {
        &self.rows
    }

    pub fn column_index(&self, attribute: Attribute) -> Option<usize> {
        self.columns.iter().position(|a| *a == attribute)
    }

    /// Values of one attribute column as a flat array
    pub fn column(&self, attribute: Attribute) -> Option<Array1<f32>> {
        let idx = self.column_index(attribute)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Every row must reference an image.
    pub fn has_path_column(&self) -> bool {
        self.rows.iter().all(|r| !r.file_location.trim().is_empty())
    }

    pub fn is_binary(&self, attribute: Attribute) -> bool {
        self.binary.contains(&attribute)
    }

    /// Rows at `indices`, in that order, as a new densely indexed table
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            binary: self.binary.clone(),
        }
    }

    /// Rows where `mask` is true go left, the rest go right. Row order is kept.
    pub fn partition_by_mask(&self, mask: &[bool]) -> (Self, Self) {
        assert_eq!(mask.len(), self.rows.len(), "mask must cover every row");
        let (left, right): (Vec<_>, Vec<_>) = self
            .rows
            .iter()
            .zip(mask.iter())
            .partition(|(_, keep)| **keep);
        let build = |rows: Vec<(&SampleRecord, &bool)>| Self {
            columns: self.columns.clone(),
            rows: rows.into_iter().map(|(r, _)| r.clone()).collect(),
            binary: self.binary.clone(),
        };
        (build(left), build(right))
    }

    /// Applies `f` to every value of `attribute` and marks the column as binary encoded.
    /// Returns false if the column is unknown.
    pub(crate) fn remap_to_binary<F: Fn(f32) -> f32>(&mut self, attribute: Attribute, f: F) -> bool {
        let idx = match self.column_index(attribute) {
            Some(idx) => idx,
            None => return false,
        };
        for row in self.rows.iter_mut() {
            row.values[idx] = f(row.values[idx]);
        }
        self.binary.insert(attribute);
        true
    }

    /// Reads a cached table. Every row must carry one value per column.
    pub fn read(path: &Path) -> Result<Self> {
        let serialized = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
        let table: Self = ron::from_str(&serialized).map_err(|source| DatasetError::Deserialize {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some((row, record)) = table
            .rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.values.len() != table.columns.len())
        {
            return Err(DatasetError::CorruptCache {
                path: path.to_path_buf(),
                row: row + 1,
                reason: format!(
                    "{} has {} values, expected {}",
                    record.file_location,
                    record.values.len(),
                    table.columns.len()
                ),
            });
        }
        Ok(table)
    }

    /// Writes the whole table in one go, replacing any previous file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let serialized = ron::to_string(self)?;
        fs::write(path, serialized).map_err(|e| DatasetError::io(path, e))
    }

    /// Reads the raw whitespace delimited annotation file.
    pub fn read_annotation(path: &Path, reporter: &dyn Reporter) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
        Self::parse_annotation(&text, reporter)
    }

    /// Parses the annotation format: an image count line, a header line naming the
    /// attributes, then one `<file> <v1> ... <v40>` line per image.
    pub fn parse_annotation(text: &str, reporter: &dyn Reporter) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let (count_line, count) = lines.next().ok_or(DatasetError::Annotation {
            line: 1,
            reason: "empty annotation file".to_string(),
        })?;
        let expected_rows: usize = count.parse().map_err(|_| DatasetError::Annotation {
            line: count_line,
            reason: format!("expected an image count, found '{}'", count),
        })?;

        let (_, header) = lines.next().ok_or(DatasetError::Annotation {
            line: count_line + 1,
            reason: "missing attribute header".to_string(),
        })?;
        let names = header.split_whitespace().collect_vec();
        let expected = Attribute::iter().collect_vec();
        let parsed: Vec<Option<Attribute>> = names.iter().map(|n| n.parse().ok()).collect();
        if names.len() != Attribute::COUNT
            || parsed.iter().zip(expected.iter()).any(|(p, e)| *p != Some(*e))
        {
            return Err(DatasetError::HeaderMismatch(names.join(" ")));
        }

        let mut table = Self::new(expected);
        for (line_no, line) in lines {
            let mut fields = line.split_whitespace();
            let file_location = match fields.next() {
                Some(f) => f.to_string(),
                None => continue,
            };
            let values = fields
                .map(|v| {
                    v.parse::<f32>().map_err(|_| DatasetError::Annotation {
                        line: line_no,
                        reason: format!("'{}' is not a number", v),
                    })
                })
                .collect::<Result<Vec<f32>>>()?;
            if values.len() != Attribute::COUNT {
                return Err(DatasetError::Annotation {
                    line: line_no,
                    reason: format!(
                        "{} has {} values, expected {}",
                        file_location,
                        values.len(),
                        Attribute::COUNT
                    ),
                });
            }
            table.rows.push(SampleRecord { file_location, values });
        }

        if table.len() != expected_rows {
            reporter.warn(&format!(
                "annotation file announces {} images but lists {}",
                expected_rows,
                table.len()
            ));
        }
        Ok(table)
    }
}
