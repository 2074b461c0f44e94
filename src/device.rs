//! Compute target selection and input placement
//!
//! A network binds to one [`ComputeTarget`] when it is built. `Cpu` runs every
//! kernel on the calling thread; `Accelerator` spreads convolution work over
//! the rayon pool that ndarray's `rayon` feature provides. Both targets perform
//! the same arithmetic per sample, so outputs are identical.

use ndarray::{Array4, ArrayView4};
use serde::{Serialize, Deserialize};

/// Requested compute target, resolved once at network construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComputeTarget {
    /// Pick `Accelerator` when more than one hardware thread is available.
    #[default]
    Auto,
    Cpu,
    Accelerator,
}

impl ComputeTarget {
    /// Resolve `Auto` into a concrete target. Concrete targets are returned as-is.
    pub fn resolve(self) -> ComputeTarget {
        match self {
            ComputeTarget::Auto => {
                if num_cpus::get() > 1 {
                    ComputeTarget::Accelerator
                } else {
                    ComputeTarget::Cpu
                }
            }
            target => target,
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, ComputeTarget::Accelerator)
    }

    /// Move an input batch onto this target.
    ///
    /// Kernels on both targets read inputs as contiguous row-major memory, so
    /// placement produces an owned standard-layout copy of the batch.
    pub fn place(&self, input: ArrayView4<f32>) -> Array4<f32> {
        input.as_standard_layout().into_owned()
    }
}

impl std::fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComputeTarget::Auto => "auto",
            ComputeTarget::Cpu => "cpu",
            ComputeTarget::Accelerator => "accelerator",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    #[test]
    fn test_resolve_never_returns_auto() {
        assert_ne!(ComputeTarget::Auto.resolve(), ComputeTarget::Auto);
        assert_eq!(ComputeTarget::Cpu.resolve(), ComputeTarget::Cpu);
        assert_eq!(ComputeTarget::Accelerator.resolve(), ComputeTarget::Accelerator);
    }

    #[test]
    fn test_place_makes_standard_layout() {
        let base = Array4::from_shape_fn((2, 3, 4, 5), |(b, c, h, w)| (b * 1000 + c * 100 + h * 10 + w) as f32);
        let mut permuted = base.view();
        permuted.swap_axes(2, 3);
        assert!(!permuted.is_standard_layout());

        let placed = ComputeTarget::Cpu.place(permuted);
        assert!(placed.is_standard_layout());
        assert_eq!(placed, permuted);
        assert_eq!(placed.len_of(Axis(2)), 5);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ComputeTarget::Accelerator).unwrap();
        assert_eq!(json, "\"accelerator\"");
        let target: ComputeTarget = serde_json::from_str("\"cpu\"").unwrap();
        assert_eq!(target, ComputeTarget::Cpu);
    }
}
