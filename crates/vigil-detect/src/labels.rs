// vigil-detect/src/labels.rs
use crate::{DetectError, Result};
use std::collections::BTreeMap;
use std::path::Path;

const COCO80: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

// ids the TF object-detection zoo leaves unused in its 1..=90 numbering
const COCO91_GAPS: [u32; 10] = [12, 26, 29, 30, 45, 66, 68, 69, 71, 83];

/// Class-id → name table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labels {
    names: BTreeMap<u32, String>,
}

impl Labels {
    /// COCO-80, 0-based (Darknet / Ultralytics heads).
    pub fn coco80() -> Self {
        Self::from_iter(COCO80.iter().enumerate().map(|(i, n)| (i as u32, n.to_string())))
    }

    /// COCO-80 under the 1-based 90-id numbering SSD MobileNet graphs emit.
    pub fn coco91() -> Self {
        let ids = (1..=90u32).filter(|id| !COCO91_GAPS.contains(id));
        Self::from_iter(ids.zip(COCO80.iter().map(|n| n.to_string())))
    }

    /// JSON object keyed by the decimal id: `{"1": "person", "2": "bicycle"}`.
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, String> =
            serde_json::from_str(text).map_err(|e| DetectError::Labels(e.to_string()))?;
        raw.into_iter()
            .map(|(k, v)| {
                k.trim()
                    .parse::<u32>()
                    .map(|id| (id, v))
                    .map_err(|_| DetectError::Labels(format!("class id {k:?} is not a number")))
            })
            .collect::<Result<BTreeMap<_, _>>>()
            .map(|names| Self { names })
    }

    /// One name per line, 0-based; blank lines are skipped without
    /// consuming an id.
    pub fn from_lines(text: &str) -> Self {
        Self::from_iter(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .enumerate()
                .map(|(i, n)| (i as u32, n.to_string())),
        )
    }

    /// `.json` files are parsed as an object, anything else as lines.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&text),
            _ => Ok(Self::from_lines(&text)),
        }
    }

    /// Name for `id`, falling back to the id itself.
    pub fn name(&self, id: u32) -> String {
        self.names.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.names.iter().find(|(_, n)| n.as_str() == name).map(|(id, _)| *id)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl FromIterator<(u32, String)> for Labels {
    fn from_iter<I: IntoIterator<Item = (u32, String)>>(iter: I) -> Self {
        Self { names: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coco_tables_agree_on_names() {
        let c80 = Labels::coco80();
        let c91 = Labels::coco91();
        assert_eq!(c80.len(), 80);
        assert_eq!(c91.len(), 80);
        assert_eq!(c80.name(0), "person");
        assert_eq!(c91.name(1), "person");
        assert_eq!(c91.name(13), "stop sign");
        assert_eq!(c91.name(90), "toothbrush");
        assert_eq!(c91.id_of("wine glass"), Some(46));
    }

    #[test]
    fn json_table() {
        let l = Labels::from_json(r#"{"1": "person", "17": "cat"}"#).unwrap();
        assert_eq!(l.name(17), "cat");
        assert_eq!(l.name(5), "5");
        assert!(Labels::from_json(r#"{"one": "person"}"#).is_err());
    }

    #[test]
    fn line_table_skips_blanks() {
        let l = Labels::from_lines("face\n\n  body \n");
        assert_eq!(l.id_of("body"), Some(1));
    }
}
