//! Shared velocity multiplier state
//!
//! One instance per process, written by the admin console and read by the
//! upstream->client relay task of every session. Each axis is an
//! independently atomic f64 (bit-cast through AtomicU64); no cross-axis
//! transaction is needed, torn reads across axes are acceptable.

use std::sync::atomic::{AtomicU64, Ordering};

pub struct VelocityState {
    x: AtomicU64,
    y: AtomicU64,
    z: AtomicU64,
}

impl Default for VelocityState {
    fn default() -> Self {
        Self::new()
    }
}

impl VelocityState {
    pub fn new() -> Self {
        Self {
            x: AtomicU64::new(1f64.to_bits()),
            y: AtomicU64::new(1f64.to_bits()),
            z: AtomicU64::new(1f64.to_bits()),
        }
    }

    pub fn set_x(&self, value: f64) {
        self.x.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_y(&self, value: f64) {
        self.y.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn set_z(&self, value: f64) {
        self.z.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Set the horizontal knockback axes (X and Z) together
    pub fn set_horizontal(&self, value: f64) {
        self.set_x(value);
        self.set_z(value);
    }

    pub fn set_all(&self, x: f64, y: f64, z: f64) {
        self.set_x(x);
        self.set_y(y);
        self.set_z(z);
    }

    pub fn reset(&self) {
        self.set_all(1.0, 1.0, 1.0);
    }

    pub fn x(&self) -> f64 {
        f64::from_bits(self.x.load(Ordering::Relaxed))
    }

    pub fn y(&self) -> f64 {
        f64::from_bits(self.y.load(Ordering::Relaxed))
    }

    pub fn z(&self) -> f64 {
        f64::from_bits(self.z.load(Ordering::Relaxed))
    }

    /// Fast path check for the relay loop: when all multipliers are 1.0 the
    /// session engine skips packet reconstruction entirely.
    pub fn is_identity(&self) -> bool {
        self.x() == 1.0 && self.y() == 1.0 && self.z() == 1.0
    }

    /// Scale a velocity triple, saturating each axis to the i16 range.
    pub fn modify(&self, vx: i16, vy: i16, vz: i16) -> (i16, i16, i16) {
        (
            scale_clamped(vx, self.x()),
            scale_clamped(vy, self.y()),
            scale_clamped(vz, self.z()),
        )
    }
}

/// Multiply as integer-valued float, truncate toward zero, saturate.
fn scale_clamped(value: i16, multiplier: f64) -> i16 {
    let scaled = (value as f64 * multiplier) as i64;
    scaled.clamp(i16::MIN as i64, i16::MAX as i64) as i16
}
