//! Named parameter sets.
//!
//! The meta-learned base parameters ("theta") and every ephemeral adapted
//! copy are represented as an ordered mapping from parameter name to a flat
//! f32 tensor. Adaptation never mutates a set in place: every inner gradient
//! step produces a fresh [`ParamSet`], which is what lets the outer
//! meta-gradient traverse the whole update sequence.
//!
//! All arithmetic is elementwise over sets with identical layout
//! (same names, same shapes, same order). A layout mismatch is a
//! programming error and panics with the offending name.

use serde::{Deserialize, Serialize};

/// Flat f32 tensor with shape metadata. Row-major layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamTensor {
    /// Flat element storage.
    pub data: Vec<f32>,
    /// Dimensions, e.g. `[out, in]` for a weight matrix.
    pub shape: Vec<usize>,
}

impl ParamTensor {
    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        Self {
            data: vec![0.0; n],
            shape: shape.to_vec(),
        }
    }

    /// Build from existing data, checking the element count.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Self {
        let n: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            n,
            "tensor data length {} does not match shape {:?}",
            data.len(),
            shape
        );
        Self {
            data,
            shape: shape.to_vec(),
        }
    }

    /// Number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }
}

/// Ordered collection of named parameter tensors.
///
/// Order is significant: gradients are returned in the same order as the
/// parameters they were taken against, and all zip-wise arithmetic relies
/// on it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParamSet {
    entries: Vec<(String, ParamTensor)>,
}

impl ParamSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a named tensor. Names must be unique.
    pub fn push(&mut self, name: impl Into<String>, tensor: ParamTensor) {
        let name = name.into();
        debug_assert!(
            self.get(&name).is_none(),
            "duplicate parameter name '{}'",
            name
        );
        self.entries.push((name, tensor));
    }

    /// Number of tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the set holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// Iterate over `(name, tensor)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    /// Total number of scalar elements across all tensors.
    pub fn numel(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.numel()).sum()
    }

    /// Zero-filled set with the same layout.
    pub fn zeros_like(&self) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(n, t)| (n.clone(), ParamTensor::zeros(&t.shape)))
                .collect(),
        }
    }

    /// True when `other` has the same names and shapes in the same order.
    pub fn same_layout(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((na, ta), (nb, tb))| na == nb && ta.shape == tb.shape)
    }

    fn zip_map(&self, other: &Self, mut f: impl FnMut(f32, f32) -> f32) -> Self {
        assert_eq!(
            self.entries.len(),
            other.entries.len(),
            "parameter set length mismatch: {} vs {}",
            self.entries.len(),
            other.entries.len()
        );
        let entries = self
            .entries
            .iter()
            .zip(other.entries.iter())
            .map(|((name, a), (other_name, b))| {
                assert_eq!(
                    name, other_name,
                    "parameter set layout mismatch: '{}' vs '{}'",
                    name, other_name
                );
                assert_eq!(
                    a.shape, b.shape,
                    "shape mismatch for parameter '{}': {:?} vs {:?}",
                    name, a.shape, b.shape
                );
                let data = a
                    .data
                    .iter()
                    .zip(b.data.iter())
                    .map(|(&x, &y)| f(x, y))
                    .collect();
                (name.clone(), ParamTensor { data, shape: a.shape.clone() })
            })
            .collect();
        Self { entries }
    }

    /// `self - scale * other`, elementwise.
    pub fn sub_scaled(&self, other: &Self, scale: f32) -> Self {
        self.zip_map(other, |a, b| a - scale * b)
    }

    /// `self + scale * other`, elementwise.
    pub fn add_scaled(&self, other: &Self, scale: f32) -> Self {
        self.zip_map(other, |a, b| a + scale * b)
    }

    /// `self + other`, elementwise.
    pub fn add(&self, other: &Self) -> Self {
        self.add_scaled(other, 1.0)
    }

    /// `self - other`, elementwise.
    pub fn sub(&self, other: &Self) -> Self {
        self.sub_scaled(other, 1.0)
    }

    /// `scale * self`, elementwise.
    pub fn scale(&self, scale: f32) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(n, t)| {
                    (
                        n.clone(),
                        ParamTensor {
                            data: t.data.iter().map(|&x| x * scale).collect(),
                            shape: t.shape.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Inner product of two sets with identical layout.
    pub fn dot(&self, other: &Self) -> f32 {
        assert!(
            self.same_layout(other),
            "parameter set layout mismatch in dot product"
        );
        self.entries
            .iter()
            .zip(other.entries.iter())
            .map(|((_, a), (_, b))| {
                a.data
                    .iter()
                    .zip(b.data.iter())
                    .map(|(&x, &y)| x * y)
                    .sum::<f32>()
            })
            .sum()
    }

    /// Euclidean norm over all elements.
    pub fn l2_norm(&self) -> f32 {
        self.entries
            .iter()
            .flat_map(|(_, t)| t.data.iter())
            .map(|&x| x * x)
            .sum::<f32>()
            .sqrt()
    }
}
