use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{DataError, Result};
use crate::geometry::{self, Quad};

/// Labels that mark text the detector should neither learn nor be punished for.
const DONT_CARE: [&str; 2] = ["*", "###"];

#[derive(Debug, Clone, PartialEq)]
pub struct TextRegion {
    pub quad: Quad,
    /// Unreadable text: excluded from the loss.
    pub dont_care: bool,
}

/// Finds the ground-truth file of an image: `<stem>.txt`, then `gt_<stem>.txt`.
pub fn annotation_path(image: &Path) -> Result<PathBuf> {
    let dir = image.parent().unwrap_or_else(|| Path::new("."));
    let stem = image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    [format!("{stem}.txt"), format!("gt_{stem}.txt")]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
        .ok_or_else(|| DataError::MissingAnnotation(image.to_path_buf()))
}

/// Parses ICDAR 2015 style lines: `x1,y1,x2,y2,x3,y3,x4,y4,transcription`.
pub fn parse(path: &Path, content: &str) -> Result<Vec<TextRegion>> {
    let mut regions = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let line = line.trim_start_matches('\u{feff}').trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.splitn(9, ',').collect();
        if fields.len() < 8 {
            return Err(DataError::Annotation {
                path: path.to_path_buf(),
                line: i + 1,
                reason: format!("expected 8 coordinates, found {}", fields.len()),
            });
        }

        let mut coords = [0f32; 8];
        for (slot, field) in coords.iter_mut().zip(&fields[..8]) {
            *slot = field.trim().parse().map_err(|_| DataError::Annotation {
                path: path.to_path_buf(),
                line: i + 1,
                reason: format!("bad coordinate '{}'", field.trim()),
            })?;
        }
        let label = fields.get(8).map(|l| l.trim()).unwrap_or("");
        regions.push(TextRegion {
            quad: [
                [coords[0], coords[1]],
                [coords[2], coords[3]],
                [coords[4], coords[5]],
                [coords[6], coords[7]],
            ],
            dont_care: DONT_CARE.contains(&label),
        });
    }
    Ok(regions)
}

pub fn load(image: &Path) -> Result<Vec<TextRegion>> {
    let path = annotation_path(image)?;
    let content = fs::read_to_string(&path).map_err(|e| DataError::io(&path, e))?;
    parse(&path, &content)
}

/// Clips regions to a `width` x `height` image, fixes their winding and
/// drops the ones that collapse below a pixel.
pub fn validate(regions: Vec<TextRegion>, width: u32, height: u32) -> Vec<TextRegion> {
    let max_x = width.saturating_sub(1) as f32;
    let max_y = height.saturating_sub(1) as f32;
    regions
        .into_iter()
        .filter_map(|region| {
            let clipped = region.quad.map(|[x, y]| [x.clamp(0.0, max_x), y.clamp(0.0, max_y)]);
            geometry::oriented(clipped).map(|quad| TextRegion {
                quad,
                dont_care: region.dont_care,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinates_and_labels() {
        let content = "\u{feff}377,117,463,117,465,130,378,130,Genaxis Theatre\n\
                       374,155,409,155,409,170,374,170,###\n\
                       \n\
                       1,2,3,2,3,4,1,4,a,b,c\n";
        let regions = parse(Path::new("gt_img_1.txt"), content).unwrap();

        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0].quad[0], [377.0, 117.0]);
        assert!(!regions[0].dont_care);
        assert!(regions[1].dont_care);
        assert!(!regions[2].dont_care);
    }

    #[test]
    fn reports_line_of_bad_coordinate() {
        let err = parse(Path::new("gt.txt"), "1,2,3,4,5,6,7,8,ok\n1,2,x,4,5,6,7,8,bad\n").unwrap_err();
        match err {
            DataError::Annotation { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("'x'"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn validation_clips_and_drops_degenerate_quads() {
        let regions = vec![
            TextRegion {
                quad: [[-5.0, -5.0], [50.0, -5.0], [50.0, 20.0], [-5.0, 20.0]],
                dont_care: false,
            },
            TextRegion {
                quad: [[200.0, 200.0], [300.0, 200.0], [300.0, 250.0], [200.0, 250.0]],
                dont_care: false,
            },
        ];
        let valid = validate(regions, 100, 100);
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].quad[0], [0.0, 0.0]);
    }

    #[test]
    fn finds_either_annotation_naming() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("img_7.jpg");
        assert!(matches!(annotation_path(&image), Err(DataError::MissingAnnotation(_))));

        std::fs::write(dir.path().join("gt_img_7.txt"), "").unwrap();
        assert_eq!(annotation_path(&image).unwrap(), dir.path().join("gt_img_7.txt"));
    }
}
