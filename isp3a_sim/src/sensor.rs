use std::sync::Arc;
use std::time::Duration;

use isp3a_traits::{
    AppliedExposure, ColorCell, ColorGrid, FrameStatistics, StatisticsSource, WeightGrid,
};
use parking_lot::Mutex;

use crate::error::{Result, SimError};

/// A static synthetic scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub image_width: u32,
    pub image_height: u32,
    pub grid_width: u16,
    pub grid_height: u16,
    pub hist_grid_width: u16,
    pub hist_grid_height: u16,
    /// Green response per microsecond at unity gain for a white cell.
    pub luminance: f64,
    pub red_ratio: f64,
    pub blue_ratio: f64,
    /// Row-major reflectance in `[0, 1]`; empty means a left-to-right gradient.
    pub reflectance: Vec<f64>,
    /// Lens position at which the scene is sharp.
    pub focus_position: i32,
    /// Lens distance at which the grid is fully blurred.
    pub focus_range: i32,
    /// Stop with `Exhausted` after this many frames.
    pub frame_limit: Option<u64>,
    /// Fail every n-th read with `Timeout`.
    pub timeout_every: Option<u64>,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            image_width: 1920,
            image_height: 1080,
            grid_width: 15,
            grid_height: 15,
            hist_grid_width: 5,
            hist_grid_height: 5,
            luminance: 0.01,
            red_ratio: 0.6,
            blue_ratio: 0.8,
            reflectance: Vec::new(),
            focus_position: 400,
            focus_range: 300,
            frame_limit: None,
            timeout_every: None,
        }
    }
}

impl Scene {
    pub fn validate(&self) -> Result<()> {
        if self.image_width == 0 || self.image_height == 0 {
            return Err(SimError::InvalidScene("image size must be > 0".into()));
        }
        if ColorGrid::new(self.grid_width, self.grid_height).is_none()
            || WeightGrid::new(self.hist_grid_width, self.hist_grid_height).is_none()
        {
            return Err(SimError::InvalidScene("grid dimensions out of range".into()));
        }
        if !(self.luminance.is_finite() && self.luminance > 0.0) {
            return Err(SimError::InvalidScene("luminance must be > 0".into()));
        }
        let cells = usize::from(self.grid_width) * usize::from(self.grid_height);
        if !self.reflectance.is_empty() && self.reflectance.len() != cells {
            return Err(SimError::InvalidScene(format!(
                "reflectance has {} entries, grid has {cells}",
                self.reflectance.len()
            )));
        }
        if self.focus_range <= 0 {
            return Err(SimError::InvalidScene("focus_range must be > 0".into()));
        }
        Ok(())
    }

    fn reflectance_at(&self, x: u16, y: u16) -> f64 {
        if self.reflectance.is_empty() {
            let span = f64::from(self.grid_width.saturating_sub(1).max(1));
            0.2 + 0.6 * f64::from(x) / span
        } else {
            let i = usize::from(y) * usize::from(self.grid_width) + usize::from(x);
            self.reflectance.get(i).copied().unwrap_or(0.0).clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Programmed {
    applied: Option<AppliedExposure>,
    exposure_time_us: f64,
    gain_multiplier: f64,
    lens_position: i32,
}

impl Default for Programmed {
    fn default() -> Self {
        Self {
            applied: None,
            exposure_time_us: 1000.0,
            gain_multiplier: 1.0,
            lens_position: 0,
        }
    }
}

/// Cloneable handle for programming the simulated sensor from the control loop.
#[derive(Debug, Clone, Default)]
pub struct SensorFeedback {
    inner: Arc<Mutex<Programmed>>,
}

impl SensorFeedback {
    /// Program the exposure used for the next rendered frames.
    pub fn apply_exposure(&self, applied: AppliedExposure, exposure_time_us: f64, gain_multiplier: f64) {
        let mut g = self.inner.lock();
        g.applied = Some(applied);
        g.exposure_time_us = exposure_time_us.max(0.0);
        g.gain_multiplier = gain_multiplier.max(0.0);
    }

    pub fn move_lens(&self, position: i32) {
        self.inner.lock().lens_position = position;
    }

    pub fn exposure_time_us(&self) -> f64 {
        self.inner.lock().exposure_time_us
    }

    pub fn lens_position(&self) -> i32 {
        self.inner.lock().lens_position
    }
}

/// Statistics source that renders a `Scene` at the programmed exposure.
#[derive(Debug)]
pub struct SimulatedSensor {
    scene: Scene,
    feedback: SensorFeedback,
    next_id: u64,
}

impl SimulatedSensor {
    pub fn new(scene: Scene) -> Result<Self> {
        scene.validate()?;
        Ok(Self {
            scene,
            feedback: SensorFeedback::default(),
            next_id: 0,
        })
    }

    pub fn feedback(&self) -> SensorFeedback {
        self.feedback.clone()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Render one frame without advancing the frame counter.
    pub fn render(&self, frame_id: u64) -> Result<FrameStatistics> {
        let p = *self.feedback.inner.lock();
        let s = &self.scene;
        let scale = s.luminance * p.exposure_time_us * p.gain_multiplier;
        let blur = (f64::from(p.lens_position.abs_diff(s.focus_position))
            / f64::from(s.focus_range))
        .min(1.0);

        let mut green = Vec::with_capacity(usize::from(s.grid_width) * usize::from(s.grid_height));
        for y in 0..s.grid_height {
            for x in 0..s.grid_width {
                green.push(s.reflectance_at(x, y) * scale);
            }
        }
        let mean = green.iter().sum::<f64>() / green.len().max(1) as f64;

        let cells = green
            .iter()
            .map(|&v| {
                let g = v * (1.0 - blur) + mean * blur;
                let r = g * s.red_ratio;
                let b = g * s.blue_ratio;
                let saturated = g.max(r).max(b) >= 255.0;
                ColorCell {
                    avg_gr: to_u8(g),
                    avg_r: to_u8(r),
                    avg_b: to_u8(b),
                    avg_gb: to_u8(g),
                    sat: if saturated { u8::MAX } else { 0 },
                }
            })
            .collect();
        let color = ColorGrid::from_cells(s.grid_width, s.grid_height, cells)
            .ok_or_else(|| SimError::InvalidScene("grid dimensions out of range".into()))?;
        let hist_weights = WeightGrid::filled(s.hist_grid_width, s.hist_grid_height, 1)
            .ok_or_else(|| SimError::InvalidScene("histogram grid out of range".into()))?;

        Ok(FrameStatistics {
            frame_id,
            image_width: s.image_width,
            image_height: s.image_height,
            color,
            hist_weights,
            applied: p.applied,
        })
    }
}

#[inline]
fn to_u8(v: f64) -> u8 {
    if v.is_nan() {
        0
    } else {
        v.round().clamp(0.0, 255.0) as u8
    }
}

impl StatisticsSource for SimulatedSensor {
    fn next_frame(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<FrameStatistics, Box<dyn std::error::Error + Send + Sync>> {
        let id = self.next_id;
        if self.scene.frame_limit.is_some_and(|n| id >= n) {
            return Err(Box::new(SimError::Exhausted));
        }
        self.next_id += 1;
        if self.scene.timeout_every.is_some_and(|n| n > 0 && (id + 1) % n == 0) {
            tracing::debug!(frame_id = id, "simulated statistics timeout");
            return Err(Box::new(SimError::Timeout));
        }
        Ok(self.render(id)?)
    }
}
