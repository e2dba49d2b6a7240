//! Two-state Kalman filter over (crank angle, angular velocity).
//!
//! State x = (θ, ω) with θ ∈ (−π, π], measurement z = (θ_meas, ω_meas),
//! transition F(Δt) = [[1, Δt], [0, 1]], measurement matrix H = I.
//! The innovation uses the shortest-arc convention for the angle
//! component so continuous rotation through the wrap never produces a
//! |d| > π correction.
//!
//! Only the 2×2 and 2×1 shapes appear, so the matrix arithmetic is
//! open-coded; the determinant of (P + R) is strictly positive for any
//! positive-definite Q + R, so the gain computation is total.
//!
//! One task (the IMU ingest task) calls `update`; any number of tasks
//! call the predict-only query. [`SharedFilter`] guards every access to
//! the (state, covariance, last-timestamp) triple with a single lock.

use std::sync::Mutex;

use meter_common::config::{Covariance2, KalmanConfig};

use crate::angle::{normalize, shortest_arc};
use crate::clock::delta_s;

// ─── 2×2 Matrix ─────────────────────────────────────────────────────

/// Row-major 2×2 matrix.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Mat2 {
    pub m00: f32,
    pub m01: f32,
    pub m10: f32,
    pub m11: f32,
}

impl Mat2 {
    pub const fn new(m00: f32, m01: f32, m10: f32, m11: f32) -> Self {
        Self { m00, m01, m10, m11 }
    }

    #[inline]
    pub fn add(&self, other: &Self) -> Self {
        Self::new(
            self.m00 + other.m00,
            self.m01 + other.m01,
            self.m10 + other.m10,
            self.m11 + other.m11,
        )
    }

    #[inline]
    pub fn sub(&self, other: &Self) -> Self {
        Self::new(
            self.m00 - other.m00,
            self.m01 - other.m01,
            self.m10 - other.m10,
            self.m11 - other.m11,
        )
    }

    #[inline]
    pub fn mul(&self, other: &Self) -> Self {
        Self::new(
            self.m00 * other.m00 + self.m01 * other.m10,
            self.m00 * other.m01 + self.m01 * other.m11,
            self.m10 * other.m00 + self.m11 * other.m10,
            self.m10 * other.m01 + self.m11 * other.m11,
        )
    }

    /// Inverse; `None` when the determinant is (numerically) zero.
    #[inline]
    pub fn inverse(&self) -> Option<Self> {
        let det = self.m00 * self.m11 - self.m01 * self.m10;
        if det.abs() < f32::MIN_POSITIVE {
            return None;
        }
        let inv = 1.0 / det;
        Some(Self::new(
            self.m11 * inv,
            -self.m01 * inv,
            -self.m10 * inv,
            self.m00 * inv,
        ))
    }
}

impl From<Covariance2> for Mat2 {
    fn from(rows: Covariance2) -> Self {
        Self::new(rows[0][0], rows[0][1], rows[1][0], rows[1][1])
    }
}

// ─── Filter ─────────────────────────────────────────────────────────

/// Filter output: the state pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Estimate {
    /// Crank angle in (−π, π] [rad].
    pub angle: f32,
    /// Angular velocity [rad/s].
    pub velocity: f32,
}

/// A predict-only query result: projected state and covariance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub angle: f32,
    pub velocity: f32,
    pub covariance: Mat2,
}

/// The two-state filter. Not thread-safe by itself; see [`SharedFilter`].
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    angle: f32,
    velocity: f32,
    p: Mat2,
    q: Mat2,
    r: Mat2,
    t_last: u32,
}

impl KalmanFilter {
    /// Filter at rest with the configured high-uncertainty initial
    /// covariance, so early measurements dominate.
    pub fn new(config: &KalmanConfig, t_start_us: u32) -> Self {
        Self {
            angle: 0.0,
            velocity: 0.0,
            p: config.initial_covariance.into(),
            q: config.environment_covariance.into(),
            r: config.measurement_covariance.into(),
            t_last: t_start_us,
        }
    }

    /// Timestamp of the last accepted update [µs].
    #[inline]
    pub fn last_update_us(&self) -> u32 {
        self.t_last
    }

    /// Project state and covariance forward by `dt` seconds.
    fn project(&self, dt: f32) -> (f32, f32, Mat2) {
        let p = &self.p;
        // F·P·Fᵀ with F = [[1, dt], [0, 1]], open-coded.
        let projected = Mat2::new(
            p.m00 + dt * (p.m01 + p.m10) + dt * dt * p.m11,
            p.m01 + dt * p.m11,
            p.m10 + dt * p.m11,
            p.m11,
        )
        .add(&self.q);
        let angle = normalize(self.angle + self.velocity * dt);
        (angle, self.velocity, projected)
    }

    /// Fuse one measurement taken at `t_now_us`.
    ///
    /// Non-finite measurement components are **rejected**: the call
    /// returns `false` and neither the state nor `t_last` advances, so
    /// the next valid sample's Δt absorbs the gap. The filter never
    /// emits a non-finite state.
    pub fn update(&mut self, measured_angle: f32, measured_velocity: f32, t_now_us: u32) -> bool {
        if !measured_angle.is_finite() || !measured_velocity.is_finite() {
            return false;
        }

        let dt = delta_s(t_now_us, self.t_last);
        let (angle, velocity, p) = self.project(dt);

        // K = P·(P + R)⁻¹. P + R is positive definite, so the inverse
        // exists; the guard only trips on degenerate configuration.
        let Some(s_inv) = p.add(&self.r).inverse() else {
            return false;
        };
        let k = p.mul(&s_inv);

        let d_angle = shortest_arc(measured_angle, angle);
        let d_velocity = measured_velocity - velocity;

        self.angle = normalize(angle + k.m00 * d_angle + k.m01 * d_velocity);
        self.velocity = velocity + k.m10 * d_angle + k.m11 * d_velocity;
        self.p = p.sub(&k.mul(&p));
        self.t_last = t_now_us;
        true
    }

    /// Predict-only query at `t_now_us`. Does not mutate stored state:
    /// two calls with the same timestamp and no intervening update
    /// return identical results.
    pub fn predict(&self, t_now_us: u32) -> Prediction {
        let dt = delta_s(t_now_us, self.t_last);
        let (angle, velocity, covariance) = self.project(dt);
        Prediction {
            angle,
            velocity,
            covariance,
        }
    }

    /// Current state pair.
    #[inline]
    pub fn estimate(&self) -> Estimate {
        Estimate {
            angle: self.angle,
            velocity: self.velocity,
        }
    }
}

// ─── Shared Wrapper ─────────────────────────────────────────────────

/// The filter behind its single critical section.
///
/// Every read and every write of the (state, covariance, last-timestamp)
/// triple goes through this lock; accesses are O(1) and short.
#[derive(Debug)]
pub struct SharedFilter {
    inner: Mutex<KalmanFilter>,
}

impl SharedFilter {
    pub fn new(filter: KalmanFilter) -> Self {
        Self {
            inner: Mutex::new(filter),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KalmanFilter> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Fuse a measurement; returns the post-update state, or `None` when
    /// the measurement was rejected.
    pub fn update(
        &self,
        measured_angle: f32,
        measured_velocity: f32,
        t_now_us: u32,
    ) -> Option<Estimate> {
        let mut filter = self.lock();
        filter
            .update(measured_angle, measured_velocity, t_now_us)
            .then(|| filter.estimate())
    }

    /// Predict-only query; safe from any task, any number of callers.
    pub fn predict(&self, t_now_us: u32) -> Prediction {
        self.lock().predict(t_now_us)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
