use serde::{Deserialize, Serialize};

/// Length of every face descriptor produced by the encoder and stored in the table.
pub const DESCRIPTOR_DIM: usize = 128;

/// Distance below which a nearest neighbor is accepted as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Axis-aligned bounding box of a located face, in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Clamp the box to a `width` × `height` image and return integer crop
    /// coordinates `(x, y, w, h)`, or `None` if nothing of the box remains.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).floor();
        let y0 = self.y.max(0.0).floor();
        let x1 = (self.x + self.width).min(width as f32).floor();
        let y1 = (self.y + self.height).min(height as f32).floor();

        if !(x1 > x0 && y1 > y0) {
            return None;
        }

        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// Fixed-length face descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn zeros() -> Self {
        Self { values: vec![0.0; DESCRIPTOR_DIM] }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when the descriptor has the expected dimension and only finite values.
    pub fn is_well_formed(&self) -> bool {
        self.values.len() == DESCRIPTOR_DIM && self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between two descriptors.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Nearest table entry for a query, whether or not it passed the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    /// Index into the descriptor table.
    pub index: usize,
    pub distance: f32,
}

/// Result of matching a query descriptor against the descriptor table.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Nearest entry, `None` only for an empty table.
    pub candidate: Option<Candidate>,
    /// Accepted identity name; `None` means the face is unknown.
    pub name: Option<String>,
}

impl MatchResult {
    pub fn unknown(candidate: Option<Candidate>) -> Self {
        Self { candidate, name: None }
    }

    pub fn is_known(&self) -> bool {
        self.name.is_some()
    }

    /// Display label: the matched name or `"Unknown"`.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// Strategy for comparing a query descriptor against the table.
pub trait Matcher {
    fn compare(&self, query: &Descriptor, table: &crate::DescriptorTable, threshold: f32) -> MatchResult;
}

/// Nearest-neighbor matcher over Euclidean distance.
///
/// Scans the whole table in index order and keeps the first strictly smaller
/// distance, so equidistant entries resolve to the lowest index.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, query: &Descriptor, table: &crate::DescriptorTable, threshold: f32) -> MatchResult {
        let mut best: Option<Candidate> = None;

        for (index, entry) in table.entries().iter().enumerate() {
            let distance = query.euclidean_distance(&entry.descriptor);
            let closer = match best {
                None => true,
                Some(prev) => distance < prev.distance,
            };
            if closer {
                best = Some(Candidate { index, distance });
            }
        }

        match best {
            Some(c) if c.distance < threshold => MatchResult {
                candidate: Some(c),
                name: Some(table.entries()[c.index].name.clone()),
            },
            other => MatchResult::unknown(other),
        }
    }
}
