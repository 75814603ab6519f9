// Density profiles along the shower trajectory.
//
// The integrator consumes density as a function of slant depth X in g/cm^2.
// Profiles are stateless; any per-depth caching happens inside the run that
// owns it, never globally.

use crate::error::{CascadeError, Result};
use serde::{Deserialize, Serialize};

/// Atmospheric (or generalized-target) density along the trajectory.
///
/// Querying beyond [`DensityProfile::max_depth`] is a deterministic
/// [`CascadeError::OutOfRange`]; profiles never extrapolate.
pub trait DensityProfile: Send + Sync {
    /// Density in g/cm^3 at slant depth `depth` g/cm^2.
    fn density(&self, depth: f64) -> Result<f64>;

    /// Largest slant depth covered by the profile, in g/cm^2.
    fn max_depth(&self) -> f64;

    /// Material traversed at slant depth `depth`.
    ///
    /// Bulk composition enters the transport only through the average target
    /// mass number of the configuration; this query serves logging and
    /// per-segment diagnostics.
    fn material_at(&self, depth: f64) -> Result<&str>;

    /// Human-readable profile name for log and error context.
    fn name(&self) -> &str;
}

/// Isothermal exponential atmosphere.
///
/// For an isothermal atmosphere X(h) = X_ground * exp(-h / H), so the local
/// density is rho(X) = X / H with H the scale height. The plane-parallel
/// zenith-angle scaling stretches the ground depth by 1/cos(theta).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsothermalAtmosphere {
    /// Scale height in cm.
    pub scale_height_cm: f64,
    /// Vertical ground-level depth in g/cm^2.
    pub ground_depth: f64,
    /// Zenith angle in degrees (plane-parallel approximation).
    pub zenith_deg: f64,
}

impl IsothermalAtmosphere {
    /// US-standard-like defaults: H = 6.34 km, X_ground = 1030 g/cm^2.
    pub fn new(zenith_deg: f64) -> Self {
        IsothermalAtmosphere {
            scale_height_cm: 6.34e5,
            ground_depth: 1030.0,
            zenith_deg,
        }
    }

    fn cos_zenith(&self) -> f64 {
        (self.zenith_deg.to_radians()).cos()
    }
}

impl DensityProfile for IsothermalAtmosphere {
    fn density(&self, depth: f64) -> Result<f64> {
        if depth < 0.0 || depth > self.max_depth() {
            return Err(CascadeError::OutOfRange {
                quantity: "slant depth [g/cm^2]",
                value: depth,
                min: 0.0,
                max: self.max_depth(),
            });
        }
        // slant depth maps back to vertical depth before the rho = X/H relation
        Ok(depth * self.cos_zenith() / self.scale_height_cm)
    }

    fn max_depth(&self) -> f64 {
        self.ground_depth / self.cos_zenith()
    }

    fn material_at(&self, depth: f64) -> Result<&str> {
        self.density(depth)?;
        Ok("air")
    }

    fn name(&self) -> &str {
        "isothermal"
    }
}

/// One homogeneous section of a generalized target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSegment {
    /// Physical length of the section in cm.
    pub length_cm: f64,
    /// Density of the section in g/cm^3.
    pub density: f64,
    pub material: String,
}

/// Piecewise-constant density trajectory through an arbitrary target.
///
/// Used for non-atmospheric propagation (beam dumps, rock, water columns).
/// The trajectory parameter is converted to slant depth by accumulating
/// rho * length over the segments.
#[derive(Debug, Clone)]
pub struct GeneralizedTarget {
    segments: Vec<TargetSegment>,
    /// Cumulative depth at each segment boundary, starting at 0.
    depth_edges: Vec<f64>,
}

impl GeneralizedTarget {
    pub fn new(segments: Vec<TargetSegment>) -> Result<Self> {
        if segments.is_empty() {
            return Err(CascadeError::OutOfRange {
                quantity: "target segments",
                value: 0.0,
                min: 1.0,
                max: f64::INFINITY,
            });
        }
        let mut depth_edges = Vec::with_capacity(segments.len() + 1);
        depth_edges.push(0.0);
        for s in &segments {
            if s.length_cm <= 0.0 || s.density <= 0.0 {
                return Err(CascadeError::OutOfRange {
                    quantity: "segment length/density",
                    value: s.length_cm.min(s.density),
                    min: f64::MIN_POSITIVE,
                    max: f64::INFINITY,
                });
            }
            let last = *depth_edges.last().unwrap();
            depth_edges.push(last + s.density * s.length_cm);
        }
        Ok(GeneralizedTarget {
            segments,
            depth_edges,
        })
    }

    /// Single homogeneous target of the given density and length.
    pub fn uniform(density: f64, length_cm: f64, material: impl Into<String>) -> Result<Self> {
        Self::new(vec![TargetSegment {
            length_cm,
            density,
            material: material.into(),
        }])
    }

    /// Largest density among the segments (used for the resonance-
    /// approximation criterion).
    pub fn max_density(&self) -> f64 {
        self.segments
            .iter()
            .map(|s| s.density)
            .fold(0.0, f64::max)
    }

    fn segment_index(&self, depth: f64) -> Result<usize> {
        if depth < 0.0 || depth > self.max_depth() {
            return Err(CascadeError::OutOfRange {
                quantity: "slant depth [g/cm^2]",
                value: depth,
                min: 0.0,
                max: self.max_depth(),
            });
        }
        let idx = self
            .depth_edges
            .partition_point(|&edge| edge <= depth)
            .saturating_sub(1);
        Ok(idx.min(self.segments.len() - 1))
    }
}

impl DensityProfile for GeneralizedTarget {
    fn density(&self, depth: f64) -> Result<f64> {
        let idx = self.segment_index(depth)?;
        Ok(self.segments[idx].density)
    }

    fn max_depth(&self) -> f64 {
        *self.depth_edges.last().unwrap()
    }

    fn material_at(&self, depth: f64) -> Result<&str> {
        let idx = self.segment_index(depth)?;
        Ok(&self.segments[idx].material)
    }

    fn name(&self) -> &str {
        "generalized-target"
    }
}
