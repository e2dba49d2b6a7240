//! Continuous-angle arithmetic and rotation detection.
//!
//! Angles live in (−π, π]. Subtraction uses the shortest-arc convention
//! so a filter innovation never exceeds π in magnitude. The rotation
//! detector partitions the circle into three sectors and fires exactly
//! once per completed forward revolution.

use std::f32::consts::PI;

/// Re-normalize an angle into (−π, π].
pub fn normalize(theta: f32) -> f32 {
    let mut t = theta;
    while t > PI {
        t -= 2.0 * PI;
    }
    while t <= -PI {
        t += 2.0 * PI;
    }
    t
}

/// Shortest-arc difference `a ⊖ b`, chosen so the result is in (−π, π].
pub fn shortest_arc(a: f32, b: f32) -> f32 {
    let mut d = (a - b).rem_euclid(2.0 * PI);
    if d > PI {
        d -= 2.0 * PI;
    }
    d
}

// ─── Sector Classifier ──────────────────────────────────────────────

/// Thirds of the circle used by the rotation detector.
///
/// Intervals are left-closed, right-open at the −π/3 and π/3 boundaries:
/// sector 0 = [−π, −π/3), sector 1 = [−π/3, π/3), sector 2 = [π/3, π].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Sector {
    Low = 0,
    Mid = 1,
    High = 2,
}

impl Sector {
    /// Classify an angle in (−π, π].
    #[inline]
    pub fn classify(theta: f32) -> Self {
        if theta < -PI / 3.0 {
            Self::Low
        } else if theta < PI / 3.0 {
            Self::Mid
        } else {
            Self::High
        }
    }
}

// ─── Rotation Detector ──────────────────────────────────────────────

/// Forward-rotation detector.
///
/// Arms on the 0→1 sector transition and completes on 2→0, so a full
/// forward revolution fires exactly once and reverse-direction motion
/// (which never produces 0→1 before 2→0) fires never.
#[derive(Debug, Clone, Default)]
pub struct RotationDetector {
    previous: Option<Sector>,
    armed: bool,
}

impl RotationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next observed angle; returns `true` when this sample
    /// completes a rotation.
    pub fn advance(&mut self, theta: f32) -> bool {
        let sector = Sector::classify(theta);
        let completed = match (self.previous, sector) {
            (Some(Sector::Low), Sector::Mid) => {
                self.armed = true;
                false
            }
            (Some(Sector::High), Sector::Low) if self.armed => {
                self.armed = false;
                true
            }
            _ => false,
        };
        self.previous = Some(sector);
        completed
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
