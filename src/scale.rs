//! Spatiotemporal extents.
//!
//! A [`Scale`] is an axis-aligned box: at most one half-open [`Extent`] per
//! [`Dimension`]. A scale with no extents is scalar and has unit volume.
//! Missing dimensions are unconstrained when intersecting, so a model that
//! only declares a time extent applies everywhere in space.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ScaleError;

/// Result type for scale construction.
pub type ScaleResult<T> = std::result::Result<T, ScaleError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    X,
    Y,
    Time,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::X => write!(f, "x"),
            Dimension::Y => write!(f, "y"),
            Dimension::Time => write!(f, "time"),
        }
    }
}

/// Half-open interval `[start, end)` along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub dimension: Dimension,
    pub start: f64,
    pub end: f64,
}

impl Extent {
    pub fn new(dimension: Dimension, start: f64, end: f64) -> ScaleResult<Self> {
        if !(start.is_finite() && end.is_finite() && start < end) {
            return Err(ScaleError::InvalidExtent {
                dimension: dimension.to_string(),
                start,
                end,
            });
        }
        Ok(Self {
            dimension,
            start,
            end,
        })
    }

    pub fn length(&self) -> f64 {
        self.end - self.start
    }

    fn intersect(&self, other: &Extent) -> Option<Extent> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Extent {
            dimension: self.dimension,
            start,
            end,
        })
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}, {})", self.dimension, self.start, self.end)
    }
}

/// An axis-aligned spatiotemporal box.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Extent>", into = "Vec<Extent>")]
pub struct Scale {
    extents: Vec<Extent>,
}

impl Scale {
    pub fn new(mut extents: Vec<Extent>) -> ScaleResult<Self> {
        extents.sort_by_key(|e| e.dimension);
        for pair in extents.windows(2) {
            if pair[0].dimension == pair[1].dimension {
                return Err(ScaleError::DuplicateDimension {
                    dimension: pair[0].dimension.to_string(),
                });
            }
        }
        for e in &extents {
            Extent::new(e.dimension, e.start, e.end)?;
        }
        Ok(Self { extents })
    }

    /// The dimensionless scale.
    pub fn scalar() -> Self {
        Self::default()
    }

    /// Rectangle in space.
    pub fn space(x0: f64, x1: f64, y0: f64, y1: f64) -> ScaleResult<Self> {
        Self::new(vec![
            Extent::new(Dimension::X, x0, x1)?,
            Extent::new(Dimension::Y, y0, y1)?,
        ])
    }

    /// Interval in time.
    pub fn time(t0: f64, t1: f64) -> ScaleResult<Self> {
        Self::new(vec![Extent::new(Dimension::Time, t0, t1)?])
    }

    /// Add or replace the extent for one dimension.
    pub fn with_extent(&self, extent: Extent) -> ScaleResult<Self> {
        let mut extents: Vec<Extent> = self
            .extents
            .iter()
            .copied()
            .filter(|e| e.dimension != extent.dimension)
            .collect();
        extents.push(extent);
        Self::new(extents)
    }

    pub fn extents(&self) -> &[Extent] {
        &self.extents
    }

    pub fn extent(&self, dimension: Dimension) -> Option<&Extent> {
        self.extents.iter().find(|e| e.dimension == dimension)
    }

    pub fn is_scalar(&self) -> bool {
        self.extents.is_empty()
    }

    pub fn volume(&self) -> f64 {
        self.extents.iter().map(Extent::length).product()
    }

    /// The part of `self` that lies within `other`, expressed over `self`'s
    /// dimensions. Dimensions `other` lacks do not restrict the result.
    pub fn intersect(&self, other: &Scale) -> Option<Scale> {
        let mut extents = Vec::with_capacity(self.extents.len());
        for e in &self.extents {
            match other.extent(e.dimension) {
                Some(o) => extents.push(e.intersect(o)?),
                None => extents.push(*e),
            }
        }
        Some(Scale { extents })
    }

    /// The part of `self` outside `other`, as disjoint boxes.
    pub fn subtract(&self, other: &Scale) -> Vec<Scale> {
        let Some(clip) = self.intersect(other) else {
            return vec![self.clone()];
        };
        let mut pieces = Vec::new();
        let mut remaining = self.extents.clone();
        for (i, c) in clip.extents.iter().enumerate() {
            let r = remaining[i];
            if r.start < c.start {
                let mut piece = remaining.clone();
                piece[i] = Extent {
                    end: c.start,
                    ..r
                };
                pieces.push(Scale { extents: piece });
            }
            if c.end < r.end {
                let mut piece = remaining.clone();
                piece[i] = Extent {
                    start: c.end,
                    ..r
                };
                pieces.push(Scale { extents: piece });
            }
            remaining[i] = *c;
        }
        pieces
    }

    /// Whether `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Scale) -> bool {
        self.extents.iter().all(|e| {
            other
                .extent(e.dimension)
                .is_some_and(|o| e.start <= o.start && o.end <= e.end)
        })
    }

    /// Decompose into `parts` equal slices along `dimension`, e.g. one per
    /// time step.
    pub fn split(&self, dimension: Dimension, parts: usize) -> ScaleResult<Vec<Scale>> {
        let invalid = || ScaleError::InvalidSplit {
            dimension: dimension.to_string(),
            parts,
        };
        if parts == 0 {
            return Err(invalid());
        }
        let extent = *self.extent(dimension).ok_or_else(invalid)?;
        let step = extent.length() / parts as f64;
        (0..parts)
            .map(|i| {
                let start = extent.start + step * i as f64;
                let end = if i + 1 == parts {
                    extent.end
                } else {
                    extent.start + step * (i + 1) as f64
                };
                self.with_extent(Extent::new(dimension, start, end)?)
            })
            .collect()
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extents.is_empty() {
            return f.write_str("scalar");
        }
        for (i, e) in self.extents.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl TryFrom<Vec<Extent>> for Scale {
    type Error = ScaleError;

    fn try_from(extents: Vec<Extent>) -> Result<Self, Self::Error> {
        Scale::new(extents)
    }
}

impl From<Scale> for Vec<Extent> {
    fn from(scale: Scale) -> Self {
        scale.extents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total_volume(pieces: &[Scale]) -> f64 {
        pieces.iter().map(Scale::volume).sum()
    }

    #[test]
    fn extent_rejects_empty_and_inverted() {
        assert!(Extent::new(Dimension::X, 1.0, 1.0).is_err());
        assert!(Extent::new(Dimension::X, 2.0, 1.0).is_err());
        assert!(Extent::new(Dimension::X, 0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn duplicate_dimension_rejected() {
        let e = Extent::new(Dimension::Time, 0.0, 1.0).unwrap();
        assert!(matches!(
            Scale::new(vec![e, e]),
            Err(ScaleError::DuplicateDimension { .. })
        ));
    }

    #[test]
    fn scalar_has_unit_volume() {
        assert_eq!(Scale::scalar().volume(), 1.0);
        assert!(Scale::scalar().subtract(&Scale::scalar()).is_empty());
    }

    #[test]
    fn intersect_treats_missing_dimensions_as_unconstrained() {
        let region = Scale::space(0.0, 10.0, 0.0, 10.0).unwrap();
        let left = Scale::new(vec![Extent::new(Dimension::X, 0.0, 5.0).unwrap()]).unwrap();
        let clipped = region.intersect(&left).unwrap();
        assert_eq!(clipped.volume(), 50.0);
        assert_eq!(clipped.extents().len(), 2);
    }

    #[test]
    fn subtract_produces_disjoint_remainder() {
        let outer = Scale::space(0.0, 10.0, 0.0, 10.0).unwrap();
        let hole = Scale::space(2.0, 4.0, 2.0, 4.0).unwrap();
        let pieces = outer.subtract(&hole);
        assert!((total_volume(&pieces) - 96.0).abs() < 1e-9);
        for (i, a) in pieces.iter().enumerate() {
            for b in &pieces[i + 1..] {
                assert!(a.intersect(b).is_none(), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn subtract_disjoint_returns_self() {
        let a = Scale::time(0.0, 1.0).unwrap();
        let b = Scale::time(2.0, 3.0).unwrap();
        assert_eq!(a.subtract(&b), vec![a.clone()]);
    }

    #[test]
    fn split_covers_whole_extent() {
        let s = Scale::time(0.0, 3.0).unwrap();
        let parts = s.split(Dimension::Time, 3).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].extent(Dimension::Time).unwrap().end, 3.0);
        assert!(s.split(Dimension::X, 2).is_err());
        assert!(s.split(Dimension::Time, 0).is_err());
    }

    #[test]
    fn display_is_stable() {
        let s = Scale::new(vec![
            Extent::new(Dimension::Time, 0.0, 1.0).unwrap(),
            Extent::new(Dimension::X, 0.0, 2.0).unwrap(),
        ])
        .unwrap();
        assert_eq!(s.to_string(), "x[0, 2) time[0, 1)");
    }
}
