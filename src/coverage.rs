//! Coverage: how much of a target scale has been accounted for, and where.
//!
//! A [`Coverage`] is an immutable value. Every operation returns a new one.
//! Covered shapes are kept pairwise disjoint and clipped to the target scale,
//! so the fraction is always the plain sum of shape volumes over the target
//! volume.

use serde::{Deserialize, Serialize};

use crate::scale::Scale;

const FRACTION_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coverage {
    scale: Scale,
    covered: Vec<Scale>,
    fraction: f64,
}

impl Coverage {
    /// Nothing of `scale` is covered.
    pub fn empty(scale: Scale) -> Self {
        Self {
            scale,
            covered: Vec::new(),
            fraction: 0.0,
        }
    }

    /// All of `scale` is covered.
    pub fn full(scale: Scale) -> Self {
        Self {
            covered: vec![scale.clone()],
            scale,
            fraction: 1.0,
        }
    }

    /// Coverage of `scale` by the union of `shapes`. Shapes may overlap each
    /// other and may extend beyond `scale`.
    pub fn of<'a>(scale: Scale, shapes: impl IntoIterator<Item = &'a Scale>) -> Self {
        let mut coverage = Self::empty(scale);
        for shape in shapes {
            coverage.absorb(shape);
        }
        coverage
    }

    pub fn scale(&self) -> &Scale {
        &self.scale
    }

    pub fn shapes(&self) -> &[Scale] {
        &self.covered
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn is_empty(&self) -> bool {
        self.covered.is_empty()
    }

    pub fn is_complete(&self, tolerance: f64) -> bool {
        self.fraction >= 1.0 - tolerance
    }

    /// Union. Shapes of `other` outside this coverage's scale are ignored.
    pub fn merge(&self, other: &Coverage) -> Coverage {
        let mut merged = self.clone();
        for shape in &other.covered {
            merged.absorb(shape);
        }
        merged
    }

    /// The uncovered portion of `target` given what `covered` already holds.
    pub fn remainder(target: &Scale, covered: &Coverage) -> Coverage {
        let mut pieces = vec![target.clone()];
        for shape in &covered.covered {
            pieces = pieces.iter().flat_map(|p| p.subtract(shape)).collect();
        }
        Coverage::of(target.clone(), &pieces)
    }

    /// Shorthand for [`Coverage::remainder`] over this coverage's own scale.
    pub fn uncovered(&self) -> Coverage {
        Coverage::remainder(&self.scale, self)
    }

    /// The part of this coverage that also lies in `other`.
    pub fn intersect(&self, other: &Coverage) -> Coverage {
        let shapes: Vec<Scale> = self
            .covered
            .iter()
            .flat_map(|a| other.covered.iter().filter_map(move |b| a.intersect(b)))
            .collect();
        Coverage::of(self.scale.clone(), &shapes)
    }

    /// How much the fraction would grow by merging `other` in.
    pub fn gain(&self, other: &Coverage) -> f64 {
        (self.merge(other).fraction - self.fraction).max(0.0)
    }

    fn absorb(&mut self, shape: &Scale) {
        let Some(clipped) = self.scale.intersect(shape) else {
            return;
        };
        let mut pieces = vec![clipped];
        for existing in &self.covered {
            pieces = pieces.iter().flat_map(|p| p.subtract(existing)).collect();
            if pieces.is_empty() {
                return;
            }
        }
        self.covered.extend(pieces);
        self.recompute_fraction();
    }

    fn recompute_fraction(&mut self) {
        let total = self.scale.volume();
        let covered: f64 = self.covered.iter().map(Scale::volume).sum();
        self.fraction = if total > 0.0 {
            (covered / total).clamp(0.0, 1.0)
        } else {
            0.0
        };
        if (1.0 - self.fraction) < FRACTION_EPSILON {
            self.fraction = 1.0;
        }
    }
}

/// Two coverages are equal when they cover the same region of the same scale,
/// however that region happens to be fragmented.
impl PartialEq for Coverage {
    fn eq(&self, other: &Self) -> bool {
        if self.scale != other.scale {
            return false;
        }
        let union = self.merge(other).fraction;
        (union - self.fraction).abs() < FRACTION_EPSILON
            && (union - other.fraction).abs() < FRACTION_EPSILON
    }
}

impl std::fmt::Display for Coverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}% of {}", self.fraction * 100.0, self.scale)
    }
}
