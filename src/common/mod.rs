//! Common utilities and types for the Lodestar robot

/// Common types used across the codebase
pub mod types {
    use nalgebra::Vector3;

    /// A 3-axis magnetic-field vector in microtesla
    pub type MagneticVector = Vector3<f64>;

    /// A point on the reference map's tile grid
    pub type TilePoint = (f64, f64);
}

use types::TilePoint;

/// Heading from one tile point to another, in radians normalized to [0, 2*pi).
///
/// Used once at startup to aim the robot from the starting location toward
/// the target before fingerprint updates take over.
pub fn heading_between(from: TilePoint, to: TilePoint) -> f64 {
    let angle = (to.1 - from.1).atan2(to.0 - from.0);
    if angle >= 0.0 {
        angle
    } else {
        angle + 2.0 * std::f64::consts::PI
    }
}

/// Same heading in degrees, [0, 360).
pub fn heading_between_degrees(from: TilePoint, to: TilePoint) -> f64 {
    heading_between(from, to).to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_is_normalized() {
        // straight east
        assert!((heading_between((0.0, 0.0), (1.0, 0.0)) - 0.0).abs() < 1e-12);
        // straight north
        let north = heading_between((0.0, 0.0), (0.0, 1.0));
        assert!((north - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        // south-west lands in the upper half of the range, not negative
        let sw = heading_between((1.0, 1.0), (0.0, 0.0));
        assert!(sw > std::f64::consts::PI && sw < 2.0 * std::f64::consts::PI);
    }

    #[test]
    fn heading_degrees_matches_radians() {
        let d = heading_between_degrees((0.0, 0.0), (-1.0, 0.0));
        assert!((d - 180.0).abs() < 1e-9);
    }
}
