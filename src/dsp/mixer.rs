//! Master bus: master volume and soft clipping on the summed stereo mix.

/// Samples over which a volume change is ramped.
const VOLUME_RAMP_SAMPLES: usize = 64;

/// The last stage before output.
#[derive(Debug, Clone)]
pub struct MasterBus {
    volume: f32,
    target: f32,
}

impl MasterBus {
    pub fn new(volume: f64) -> Self {
        let v = volume.clamp(0.0, 1.0) as f32;
        MasterBus { volume: v, target: v }
    }

    /// Set the master volume (0..1). The change is ramped to avoid zipper noise.
    pub fn set_volume(&mut self, volume: f64) {
        self.target = volume.clamp(0.0, 1.0) as f32;
    }

    pub fn volume(&self) -> f64 {
        self.target as f64
    }

    /// Apply volume and soft clipping in place.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let step = (self.target - self.volume) / VOLUME_RAMP_SAMPLES as f32;
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            if self.volume != self.target {
                self.volume += step;
                if (step > 0.0 && self.volume > self.target) || (step < 0.0 && self.volume < self.target) {
                    self.volume = self.target;
                }
            }
            *l = soft_clip(*l * self.volume);
            *r = soft_clip(*r * self.volume);
        }
    }
}

/// Soft clipper using tanh to prevent harsh digital clipping.
fn soft_clip(x: f32) -> f32 {
    x.tanh()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_stays_silent() {
        let mut m = MasterBus::new(0.8);
        let mut l = vec![0.0f32; 128];
        let mut r = vec![0.0f32; 128];
        m.process(&mut l, &mut r);
        assert!(l.iter().chain(r.iter()).all(|&s| s == 0.0));
    }

    #[test]
    fn applies_gain_and_clip() {
        let mut m = MasterBus::new(1.0);
        let mut l = vec![0.5f32, 0.8, 10.0];
        let mut r = vec![0.0f32; 3];
        m.process(&mut l, &mut r);
        assert!((l[0] - soft_clip(0.5)).abs() < 1e-6);
        assert!((l[1] - soft_clip(0.8)).abs() < 1e-6);
        assert!(l[2] < 1.0);
    }

    #[test]
    fn volume_change_is_ramped() {
        let mut m = MasterBus::new(1.0);
        m.set_volume(0.0);
        let mut l = vec![0.5f32; 128];
        let mut r = vec![0.5f32; 128];
        m.process(&mut l, &mut r);
        assert!(l[0] > 0.4, "first sample barely moves");
        assert!(l[32] > 0.0 && l[32] < l[0]);
        assert_eq!(l[127], 0.0);
        assert_eq!(m.volume(), 0.0);
    }
}
