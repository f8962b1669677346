use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Box representation regressed by the geometry head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Geometry {
    /// Four edge distances plus a rotation angle.
    #[serde(rename = "RBOX")]
    Rbox,
}

impl Geometry {
    /// Channels of the geometry map.
    pub fn channels(self) -> usize {
        match self {
            Geometry::Rbox => 5,
        }
    }
}

impl FromStr for Geometry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RBOX" => Ok(Geometry::Rbox),
            other => Err(format!("unsupported geometry '{other}', only RBOX is implemented")),
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Geometry::Rbox => write!(f, "RBOX"),
        }
    }
}

/// The part of the training settings the data pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub input_size: usize,
    pub batch_size: usize,
    pub training_data_path: PathBuf,
    pub validation_data_path: PathBuf,
    pub max_image_large_side: usize,
    pub max_text_size: usize,
    pub min_text_size: usize,
    pub min_crop_side_ratio: f64,
    pub geometry: Geometry,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_size: 512,
            batch_size: 16,
            training_data_path: PathBuf::from("../data/ICDAR2015/train_data"),
            validation_data_path: PathBuf::from("../data/MLT/val_data_latin"),
            max_image_large_side: 1280,
            max_text_size: 800,
            min_text_size: 10,
            min_crop_side_ratio: 0.1,
            geometry: Geometry::Rbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_names() {
        assert_eq!("RBOX".parse::<Geometry>(), Ok(Geometry::Rbox));
        assert!("QUAD".parse::<Geometry>().is_err());
        assert_eq!(Geometry::Rbox.to_string(), "RBOX");
    }
}
