//! Discrete PID law with clamped output and integral anti-windup

use std::{
    error::Error as ErrorT,
    fmt::Display,
    time::{Duration, Instant},
};

/// Smallest time step the law will divide by, in seconds
const DT_FLOOR_S: f32 = 1e-6;

pub const DEFAULT_KP: f32 = 1.0;
pub const DEFAULT_KI: f32 = 0.03;
pub const DEFAULT_KD: f32 = 0.0;
pub const DEFAULT_SAMPLE_TIME_S: f32 = 2.0;
/// Longest sample period accepted, one day
pub const MAX_SAMPLE_TIME_S: f32 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PidError {
    BadSampleTime(f32),
    BadLimits(f32, f32),
    NotFinite(&'static str),
}

impl Display for PidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadSampleTime(ts) => write!(
                f,
                "sample time must be in (0, {}], got {}",
                MAX_SAMPLE_TIME_S, ts
            ),
            Self::BadLimits(lo, hi) => write!(f, "output limits ({}, {}) are inverted", lo, hi),
            Self::NotFinite(what) => write!(f, "{} must be a finite number", what),
        }
    }
}

impl ErrorT for PidError {}

fn finite(what: &'static str, value: f32) -> Result<f32, PidError> {
    match value.is_finite() {
        true => Ok(value),
        false => Err(PidError::NotFinite(what)),
    }
}

/// PID law `u = Kp e + Ki sum(e dt) + Kd de/dt` evaluated at most once per
/// sample period.
///
/// The integral is clamped to the output limits after every step so it can
/// never wind up past what the actuator accepts. While auto mode is off the
/// law holds its last output and leaves its state alone.
#[derive(Debug, Clone, PartialEq)]
pub struct PidLaw {
    kp: f32,
    ki: f32,
    kd: f32,
    setpoint: f32,
    sample_time_s: f32,
    out_lo: f32,
    out_hi: f32,
    auto_mode: bool,

    integral: f32,
    last_error: f32,
    last_time: Option<Instant>,
    last_output: Option<f32>,
    /// (P, I, D) of the last evaluation
    components: (f32, f32, f32),
}

impl PidLaw {
    pub fn new(kp: f32, ki: f32, kd: f32, setpoint: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint,
            sample_time_s: DEFAULT_SAMPLE_TIME_S,
            out_lo: f32::NEG_INFINITY,
            out_hi: f32::INFINITY,
            auto_mode: true,
            integral: 0.0,
            last_error: 0.0,
            last_time: None,
            last_output: None,
            components: (0.0, 0.0, 0.0),
        }
    }

    /// Builder form of [`PidLaw::set_output_limits`]
    pub fn with_output_limits(mut self, lo: f32, hi: f32) -> Result<Self, PidError> {
        self.set_output_limits(lo, hi)?;
        Ok(self)
    }

    /// Builder form of [`PidLaw::set_sample_time`]
    pub fn with_sample_time(mut self, sample_time_s: f32) -> Result<Self, PidError> {
        self.set_sample_time(sample_time_s)?;
        Ok(self)
    }

    /// Evaluate against the wall clock.
    #[inline]
    pub fn update(&mut self, measurement: f32) -> f32 {
        self.update_at(measurement, Instant::now())
    }

    /// Evaluate as if the measurement was taken at `now`.
    ///
    /// Calls made before a sample period has elapsed since the previous
    /// evaluation return the previous output untouched.
    pub fn update_at(&mut self, measurement: f32, now: Instant) -> f32 {
        if !self.auto_mode {
            return self.held_output();
        }

        let dt = match (self.last_time, self.last_output) {
            (Some(last_time), Some(_)) => {
                let elapsed = now.saturating_duration_since(last_time);

                if elapsed < Duration::from_secs_f32(self.sample_time_s) {
                    return self.held_output();
                }

                elapsed.as_secs_f32()
            }
            // Nothing to measure against yet, assume a nominal period
            _ => self.sample_time_s,
        };

        self.last_time = Some(now);

        self.step(measurement, dt)
    }

    /// Evaluate with a caller supplied time step, bypassing the clock and the
    /// sample period check. Used for deterministic simulation.
    pub fn update_with_dt(&mut self, measurement: f32, dt_s: f32) -> f32 {
        if !self.auto_mode {
            return self.held_output();
        }

        self.step(measurement, dt_s)
    }

    fn step(&mut self, measurement: f32, dt_s: f32) -> f32 {
        let dt = dt_s.max(DT_FLOOR_S);
        let error = self.setpoint - measurement;

        let p = self.kp * error;

        self.integral = (self.integral + self.ki * error * dt).clamp(self.out_lo, self.out_hi);

        let d = self.kd * (error - self.last_error) / dt;
        self.last_error = error;

        let output = (p + self.integral + d).clamp(self.out_lo, self.out_hi);

        self.components = (p, self.integral, d);
        self.last_output = Some(output);

        output
    }

    /// The output the law is holding, the lower bound if it never ran
    pub fn held_output(&self) -> f32 {
        self.last_output
            .unwrap_or_else(|| 0.0_f32.clamp(self.out_lo, self.out_hi))
    }

    /// Forget accumulated state, the gains and limits are kept
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_time = None;
        self.last_output = None;
        self.components = (0.0, 0.0, 0.0);
    }

    /// Drop the time of the last evaluation so the next one runs straight
    /// away. Accumulators are kept.
    pub fn forget_clock(&mut self) {
        self.last_time = None;
    }

    #[inline]
    pub fn kp(&self) -> f32 {
        self.kp
    }

    #[inline]
    pub fn ki(&self) -> f32 {
        self.ki
    }

    #[inline]
    pub fn kd(&self) -> f32 {
        self.kd
    }

    pub fn set_kp(&mut self, kp: f32) -> Result<(), PidError> {
        self.kp = finite("kp", kp)?;
        Ok(())
    }

    pub fn set_ki(&mut self, ki: f32) -> Result<(), PidError> {
        self.ki = finite("ki", ki)?;
        Ok(())
    }

    pub fn set_kd(&mut self, kd: f32) -> Result<(), PidError> {
        self.kd = finite("kd", kd)?;
        Ok(())
    }

    #[inline]
    pub fn setpoint(&self) -> f32 {
        self.setpoint
    }

    pub fn set_setpoint(&mut self, setpoint: f32) -> Result<(), PidError> {
        self.setpoint = finite("setpoint", setpoint)?;
        Ok(())
    }

    #[inline]
    pub fn sample_time(&self) -> f32 {
        self.sample_time_s
    }

    pub fn set_sample_time(&mut self, sample_time_s: f32) -> Result<(), PidError> {
        if !(sample_time_s > 0.0 && sample_time_s <= MAX_SAMPLE_TIME_S) {
            return Err(PidError::BadSampleTime(sample_time_s));
        }

        self.sample_time_s = sample_time_s;
        Ok(())
    }

    #[inline]
    pub fn output_limits(&self) -> (f32, f32) {
        (self.out_lo, self.out_hi)
    }

    pub fn set_output_limits(&mut self, lo: f32, hi: f32) -> Result<(), PidError> {
        if lo.is_nan() || hi.is_nan() || lo > hi {
            return Err(PidError::BadLimits(lo, hi));
        }

        self.out_lo = lo;
        self.out_hi = hi;

        self.integral = self.integral.clamp(lo, hi);
        self.last_output = self.last_output.map(|out| out.clamp(lo, hi));

        Ok(())
    }

    #[inline]
    pub fn auto_mode(&self) -> bool {
        self.auto_mode
    }

    /// Switch between automatic and held output. Turning automatic mode back
    /// on seeds the integral with the held output so the output does not jump.
    pub fn set_auto_mode(&mut self, enabled: bool) {
        if enabled && !self.auto_mode {
            let held = self.held_output();

            self.reset();
            self.integral = held.clamp(self.out_lo, self.out_hi);
        }

        self.auto_mode = enabled;
    }

    #[inline]
    pub fn integral(&self) -> f32 {
        self.integral
    }

    #[inline]
    pub fn components(&self) -> (f32, f32, f32) {
        self.components
    }
}

impl Default for PidLaw {
    fn default() -> Self {
        Self::new(DEFAULT_KP, DEFAULT_KI, DEFAULT_KD, 0.0)
    }
}

impl Display for PidLaw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pid(kp={}, ki={}, kd={}, setpoint={}, sample_time={}, output_limits=({}, {}), auto_mode={})",
            self.kp,
            self.ki,
            self.kd,
            self.setpoint,
            self.sample_time_s,
            self.out_lo,
            self.out_hi,
            self.auto_mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn law() -> PidLaw {
        PidLaw::new(2.0, 0.5, 0.0, 100.0)
            .with_output_limits(0.0, 30.0)
            .unwrap()
    }

    #[test]
    fn proportional_only() {
        let mut pid = PidLaw::new(0.5, 0.0, 0.0, 50.0);

        assert_eq!(pid.update_with_dt(40.0, 1.0), 5.0);
        assert_eq!(pid.update_with_dt(60.0, 1.0), -5.0);
    }

    #[test]
    fn output_stays_in_bounds() {
        let mut pid = law();

        for temp in [0.0, 20.0, 99.0, 100.0, 150.0, 400.0, -40.0] {
            let out = pid.update_with_dt(temp, 2.0);
            assert!((0.0..=30.0).contains(&out), "{} out of bounds", out);
        }
    }

    #[test]
    fn integral_does_not_wind_up() {
        let mut pid = law();

        // Far below setpoint, unclamped output would keep growing
        for _ in 0..500 {
            pid.update_with_dt(0.0, 2.0);
            assert!(pid.integral() <= 30.0);
        }

        assert_eq!(pid.integral(), 30.0);

        // A clamped integral lets the output come off the rail as soon as the
        // error changes sign
        let out = pid.update_with_dt(120.0, 2.0);
        assert!(out < 30.0);
    }

    #[test]
    fn derivative_on_error() {
        let mut pid = PidLaw::new(0.0, 0.0, 1.0, 10.0);

        assert_eq!(pid.update_with_dt(10.0, 1.0), 0.0);
        assert_eq!(pid.update_with_dt(8.0, 0.5), 4.0);
    }

    #[test]
    fn manual_mode_holds_output() {
        let mut pid = law();

        let out = pid.update_with_dt(90.0, 2.0);
        let integral = pid.integral();

        pid.set_auto_mode(false);

        assert_eq!(pid.update_with_dt(0.0, 2.0), out);
        assert_eq!(pid.integral(), integral);
    }

    #[test]
    fn auto_mode_is_bumpless() {
        let mut pid = PidLaw::new(0.0, 0.1, 0.0, 50.0)
            .with_output_limits(0.0, 30.0)
            .unwrap();

        pid.update_with_dt(0.0, 2.0);
        let held = pid.update_with_dt(0.0, 2.0);

        pid.set_auto_mode(false);
        pid.set_auto_mode(true);

        // At setpoint the only contribution is the seeded integral
        assert_eq!(pid.update_with_dt(50.0, 2.0), held);
    }

    #[test]
    fn rate_limited_by_sample_time() {
        let mut pid = law().with_sample_time(2.0).unwrap();
        let t0 = Instant::now();

        let first = pid.update_at(95.0, t0);
        assert_eq!(first, 15.0);

        // Too early, nothing changes even though the measurement did
        assert_eq!(pid.update_at(99.0, t0), first);
        assert_eq!(pid.update_at(99.0, t0 + Duration::from_millis(1999)), first);

        let second = pid.update_at(99.0, t0 + Duration::from_secs(2));
        assert_eq!(second, 8.0);
    }

    #[test]
    fn zero_sample_time_rejected() {
        let mut pid = law();

        assert_eq!(pid.set_sample_time(0.0), Err(PidError::BadSampleTime(0.0)));
        pid.set_sample_time(-1.0).unwrap_err();
        assert_eq!(pid.sample_time(), DEFAULT_SAMPLE_TIME_S);
    }

    #[test]
    fn limits_rejected_when_inverted() {
        let mut pid = law();

        assert_eq!(
            pid.set_output_limits(10.0, 5.0),
            Err(PidError::BadLimits(10.0, 5.0))
        );
        assert_eq!(pid.output_limits(), (0.0, 30.0));
    }

    #[test]
    fn narrowing_limits_clamps_state() {
        let mut pid = law();

        for _ in 0..100 {
            pid.update_with_dt(0.0, 2.0);
        }

        pid.set_output_limits(0.0, 12.0).unwrap();

        assert_eq!(pid.integral(), 12.0);
        assert_eq!(pid.held_output(), 12.0);
    }

    #[test]
    fn identity_string() {
        let pid = PidLaw::default().with_output_limits(0.0, 30.0).unwrap();

        assert_eq!(
            pid.to_string(),
            "Pid(kp=1, ki=0.03, kd=0, setpoint=0, sample_time=2, output_limits=(0, 30), auto_mode=true)"
        );
    }
}
