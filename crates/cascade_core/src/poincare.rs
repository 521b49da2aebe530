//! Poincaré section extraction from sampled trajectories.
//!
//! A section is the set of trajectory intersections with an axis-aligned
//! hyperplane `state[plane_coord] == plane_value`. The default detector
//! locates sign changes of the signed plane distance between consecutive
//! samples and places each crossing by linear interpolation, so section
//! quality depends on the sampling interval, not on solver internals.

use serde::{Deserialize, Serialize};

use crate::error::{CascadeError, Result};
use crate::trajectory::Trajectory;

/// Which crossing orientations to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossingFilter {
    /// Plane distance goes from non-positive to positive.
    Positive,
    /// Plane distance goes from non-negative to negative.
    Negative,
    /// Both orientations.
    Both,
}

/// Orientation of one recorded crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossingDirection {
    Positive,
    Negative,
}

/// How crossings are detected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DetectionMode {
    /// Sign change between consecutive samples, refined by linear
    /// interpolation. The default and the right choice almost always.
    Interpolated,
    /// Keep raw samples lying within `tolerance` of the plane, tagged with
    /// the sign of the discrete derivative of the plane distance. Coarser
    /// than interpolation; exposed for diagnostics on sparse data. The
    /// direction tag comes from a finite difference between consecutive
    /// samples, so the trajectory needs at least two samples; a lone
    /// in-band sample yields no crossings.
    ToleranceBand { tolerance: f64 },
}

/// Configuration for [`poincare_section`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SectionConfig {
    /// Index of the coordinate defining the plane.
    pub plane_coord: usize,
    /// Plane offset along that coordinate.
    pub plane_value: f64,
    pub direction: CrossingFilter,
    pub mode: DetectionMode,
}

impl Default for SectionConfig {
    fn default() -> Self {
        Self {
            plane_coord: 0,
            plane_value: 0.0,
            direction: CrossingFilter::Positive,
            mode: DetectionMode::Interpolated,
        }
    }
}

impl SectionConfig {
    pub(crate) fn validate(&self, dim: usize) -> Result<()> {
        if self.plane_coord >= dim {
            return Err(CascadeError::invalid(format!(
                "Plane coordinate {} out of range for dimension {}.",
                self.plane_coord, dim
            )));
        }
        if !self.plane_value.is_finite() {
            return Err(CascadeError::invalid("Plane value must be finite."));
        }
        if let DetectionMode::ToleranceBand { tolerance } = self.mode {
            if !tolerance.is_finite() || tolerance <= 0.0 {
                return Err(CascadeError::invalid(
                    "Tolerance band width must be positive and finite.",
                ));
            }
        }
        Ok(())
    }
}

/// One intersection of a trajectory with the section plane.
///
/// `point` holds the non-plane coordinates in their original order, so it
/// has one entry fewer than the trajectory dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Crossing {
    pub time: f64,
    pub point: Vec<f64>,
    pub direction: CrossingDirection,
}

/// Extracts the Poincaré section of `trajectory` under `config`.
///
/// A trajectory that never meets the plane yields an empty vector; that is
/// a legitimate outcome, not an error.
pub fn poincare_section(trajectory: &Trajectory, config: &SectionConfig) -> Result<Vec<Crossing>> {
    config.validate(trajectory.dim())?;

    match config.mode {
        DetectionMode::Interpolated => Ok(interpolated_crossings(trajectory, config)),
        DetectionMode::ToleranceBand { tolerance } => {
            Ok(banded_crossings(trajectory, config, tolerance))
        }
    }
}

fn interpolated_crossings(trajectory: &Trajectory, config: &SectionConfig) -> Vec<Crossing> {
    let mut crossings = Vec::new();
    if trajectory.len() < 2 {
        return crossings;
    }

    for i in 0..trajectory.len() - 1 {
        let c1 = trajectory.state(i)[config.plane_coord] - config.plane_value;
        let c2 = trajectory.state(i + 1)[config.plane_coord] - config.plane_value;

        let direction = if c1 == 0.0 && c2 == 0.0 {
            // Segment lying entirely on the plane: counted once, at its
            // midpoint, tagged as an upward crossing by convention.
            CrossingDirection::Positive
        } else if c1 <= 0.0 && c2 > 0.0 {
            CrossingDirection::Positive
        } else if c1 >= 0.0 && c2 < 0.0 {
            CrossingDirection::Negative
        } else {
            continue;
        };
        if !wanted(config.direction, direction) {
            continue;
        }

        // Interpolation fraction along the segment. c1 == c2 only survives
        // the guards when both samples sit exactly on the plane; that
        // degenerate segment crosses at its midpoint.
        let s = if c1 == c2 { 0.5 } else { -c1 / (c2 - c1) };
        crossings.push(Crossing {
            time: lerp(trajectory.time(i), trajectory.time(i + 1), s),
            point: lerp_point(trajectory.state(i), trajectory.state(i + 1), s, config.plane_coord),
            direction,
        });
    }
    crossings
}

fn banded_crossings(
    trajectory: &Trajectory,
    config: &SectionConfig,
    tolerance: f64,
) -> Vec<Crossing> {
    let mut crossings = Vec::new();
    if trajectory.len() < 2 {
        return crossings;
    }

    for i in 0..trajectory.len() {
        let c = trajectory.state(i)[config.plane_coord] - config.plane_value;
        if c.abs() >= tolerance {
            continue;
        }

        // Discrete derivative of the plane distance: forward difference,
        // falling back to backward at the final sample.
        let d = if i + 1 < trajectory.len() {
            trajectory.state(i + 1)[config.plane_coord] - trajectory.state(i)[config.plane_coord]
        } else {
            trajectory.state(i)[config.plane_coord] - trajectory.state(i - 1)[config.plane_coord]
        };
        // A flat difference carries no orientation; skip the sample.
        if d == 0.0 {
            continue;
        }
        let direction = if d > 0.0 {
            CrossingDirection::Positive
        } else {
            CrossingDirection::Negative
        };
        if !wanted(config.direction, direction) {
            continue;
        }

        let state = trajectory.state(i);
        let point = state
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != config.plane_coord)
            .map(|(_, v)| *v)
            .collect();
        crossings.push(Crossing {
            time: trajectory.time(i),
            point,
            direction,
        });
    }
    crossings
}

fn wanted(filter: CrossingFilter, direction: CrossingDirection) -> bool {
    match filter {
        CrossingFilter::Positive => direction == CrossingDirection::Positive,
        CrossingFilter::Negative => direction == CrossingDirection::Negative,
        CrossingFilter::Both => true,
    }
}

fn lerp(a: f64, b: f64, s: f64) -> f64 {
    a + s * (b - a)
}

fn lerp_point(a: &[f64], b: &[f64], s: f64, skip: usize) -> Vec<f64> {
    a.iter()
        .zip(b)
        .enumerate()
        .filter(|(j, _)| *j != skip)
        .map(|(_, (x, y))| lerp(*x, *y, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{
        poincare_section, Crossing, CrossingDirection, CrossingFilter, DetectionMode,
        SectionConfig,
    };
    use crate::error::Result;
    use crate::trajectory::Trajectory;

    /// (sin t, cos t) sampled on a grid; crossings of sin t = 0 are known
    /// in closed form.
    fn circle_trajectory(t0: f64, t1: f64, dt: f64) -> Trajectory {
        let count = ((t1 - t0) / dt).round() as usize + 1;
        let times: Vec<f64> = (0..count).map(|i| t0 + i as f64 * dt).collect();
        let states: Vec<f64> = times.iter().flat_map(|t| [t.sin(), t.cos()]).collect();
        Trajectory::from_parts(2, times, states).unwrap()
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn section(traj: &Trajectory, config: &SectionConfig) -> Vec<Crossing> {
        poincare_section(traj, config).unwrap()
    }

    #[test]
    fn upward_zero_crossings_of_a_sine_are_located_exactly() {
        // Start just below zero so both upward crossings (t = 0 mod 2pi)
        // fall strictly inside the sampled window.
        let traj = circle_trajectory(-0.05, 7.0, 0.01);
        let config = SectionConfig::default();

        let crossings = section(&traj, &config);
        assert_eq!(crossings.len(), 2);

        let expected = [0.0, 2.0 * std::f64::consts::PI];
        for (crossing, t_true) in crossings.iter().zip(expected) {
            assert!(
                (crossing.time - t_true).abs() < 1e-4,
                "crossing at {} expected near {t_true}",
                crossing.time
            );
            // The interpolated point must sit on the plane to first order.
            assert!(crossing.time.sin().abs() < 1e-4);
            // One coordinate is removed; the survivor is cos t ~ 1.
            assert_eq!(crossing.point.len(), 1);
            assert!((crossing.point[0] - 1.0).abs() < 1e-4);
            assert_eq!(crossing.direction, CrossingDirection::Positive);
        }
    }

    #[test]
    fn finer_sampling_tightens_the_interpolated_crossing() {
        let traj = circle_trajectory(-0.05, 7.0, 0.001);
        let crossings = section(&traj, &SectionConfig::default());
        assert_eq!(crossings.len(), 2);
        for crossing in &crossings {
            assert!(crossing.time.sin().abs() < 1e-6);
        }
    }

    #[test]
    fn later_measurement_windows_retain_a_subset_of_crossings() {
        // Crossings carry times, so discarding a longer transient is a
        // filter by start time; counts can only shrink.
        let traj = circle_trajectory(-0.05, 27.0, 0.01);
        let all = section(&traj, &SectionConfig::default());
        let after = |t0: f64| all.iter().filter(|c| c.time >= t0).count();
        assert_eq!(after(-0.1), all.len());
        assert!(after(5.0) >= after(10.0));
        assert!(after(10.0) >= after(20.0));
        assert!(after(20.0) >= 1);
    }

    #[test]
    fn negative_filter_finds_the_downward_crossing() {
        let traj = circle_trajectory(-0.05, 7.0, 0.01);
        let config = SectionConfig {
            direction: CrossingFilter::Negative,
            ..SectionConfig::default()
        };

        let crossings = section(&traj, &config);
        assert_eq!(crossings.len(), 1);
        assert!((crossings[0].time - std::f64::consts::PI).abs() < 1e-4);
        assert_eq!(crossings[0].direction, CrossingDirection::Negative);
    }

    #[test]
    fn both_filter_is_the_union_of_the_one_sided_filters() {
        let traj = circle_trajectory(-0.05, 7.0, 0.01);
        let both = section(
            &traj,
            &SectionConfig {
                direction: CrossingFilter::Both,
                ..SectionConfig::default()
            },
        );
        assert_eq!(both.len(), 3);
        assert_eq!(both[0].direction, CrossingDirection::Positive);
        assert_eq!(both[1].direction, CrossingDirection::Negative);
        assert_eq!(both[2].direction, CrossingDirection::Positive);
    }

    #[test]
    fn trajectory_on_one_side_of_the_plane_yields_an_empty_section() {
        let traj = circle_trajectory(-0.05, 7.0, 0.01);
        let config = SectionConfig {
            plane_value: 2.0,
            ..SectionConfig::default()
        };
        assert!(section(&traj, &config).is_empty());
    }

    #[test]
    fn sample_exactly_on_the_plane_is_attributed_once() {
        // sin(0) == 0 lands a sample exactly on the plane. The segment
        // masks claim it for the upward crossing only.
        let traj = circle_trajectory(0.0, 7.0, 0.01);
        let config = SectionConfig {
            direction: CrossingFilter::Both,
            ..SectionConfig::default()
        };
        let crossings = section(&traj, &config);
        assert_eq!(crossings.len(), 3);
        assert_eq!(crossings[0].time, 0.0);
        assert_eq!(crossings[0].direction, CrossingDirection::Positive);
    }

    #[test]
    fn segment_lying_on_the_plane_crosses_at_its_midpoint() {
        // Both samples exactly on the plane: the degenerate tie-break
        // places one crossing at s = 0.5, tagged Positive by convention.
        let traj = Trajectory::from_parts(2, vec![0.0, 1.0], vec![0.0, 3.0, 0.0, 5.0]).unwrap();
        let config = SectionConfig {
            direction: CrossingFilter::Both,
            ..SectionConfig::default()
        };

        let crossings = section(&traj, &config);
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].time, 0.5);
        assert_eq!(crossings[0].point, vec![4.0]);
        assert_eq!(crossings[0].direction, CrossingDirection::Positive);

        // The Positive filter sees it too; Negative does not.
        assert_eq!(section(&traj, &SectionConfig::default()).len(), 1);
        let negative = SectionConfig {
            direction: CrossingFilter::Negative,
            ..SectionConfig::default()
        };
        assert!(section(&traj, &negative).is_empty());
    }

    #[test]
    fn single_sample_band_trajectories_yield_no_crossings() {
        // One in-band sample has no neighbor to take a finite difference
        // against, so band mode reports nothing.
        let traj = Trajectory::from_parts(2, vec![0.0], vec![0.0, 1.0]).unwrap();
        let config = SectionConfig {
            mode: DetectionMode::ToleranceBand { tolerance: 0.5 },
            direction: CrossingFilter::Both,
            ..SectionConfig::default()
        };
        assert!(section(&traj, &config).is_empty());
    }

    #[test]
    fn tolerance_band_collects_near_plane_samples_with_direction_tags() {
        let traj = circle_trajectory(-0.05, 7.0, 0.01);
        let config = SectionConfig {
            mode: DetectionMode::ToleranceBand { tolerance: 0.03 },
            ..SectionConfig::default()
        };

        let crossings = section(&traj, &config);
        // sin moves ~0.01 per sample near its zeros, so each of the two
        // upward passes contributes several band members.
        assert!(crossings.len() >= 8, "got {}", crossings.len());
        for crossing in &crossings {
            assert_eq!(crossing.direction, CrossingDirection::Positive);
            assert!(crossing.time.sin().abs() < 0.03);
            assert_eq!(crossing.point.len(), 1);
        }
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        let traj = circle_trajectory(0.0, 1.0, 0.01);
        assert_err_contains(
            poincare_section(
                &traj,
                &SectionConfig {
                    plane_coord: 2,
                    ..SectionConfig::default()
                },
            ),
            "out of range",
        );
        assert_err_contains(
            poincare_section(
                &traj,
                &SectionConfig {
                    plane_value: f64::NAN,
                    ..SectionConfig::default()
                },
            ),
            "finite",
        );
        assert_err_contains(
            poincare_section(
                &traj,
                &SectionConfig {
                    mode: DetectionMode::ToleranceBand { tolerance: 0.0 },
                    ..SectionConfig::default()
                },
            ),
            "Tolerance band",
        );
    }

    #[test]
    fn section_points_drop_the_plane_coordinate() {
        let times = vec![0.0, 1.0];
        let states = vec![1.0, -0.5, 7.0, 2.0, 0.5, 8.0];
        let traj = Trajectory::from_parts(3, times, states).unwrap();
        let config = SectionConfig {
            plane_coord: 1,
            ..SectionConfig::default()
        };

        let crossings = section(&traj, &config);
        assert_eq!(crossings.len(), 1);
        assert_eq!(crossings[0].point.len(), 2);
        // Crossing halfway between the samples: both kept coordinates
        // interpolate at s = 0.5.
        assert!((crossings[0].time - 0.5).abs() < 1e-12);
        assert!((crossings[0].point[0] - 1.5).abs() < 1e-12);
        assert!((crossings[0].point[1] - 7.5).abs() < 1e-12);
    }
}
