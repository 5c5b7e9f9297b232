//! Scalar features over a time window or a magnitude spectrum.

/// Floor of reported magnitudes, dB. Bins at the floor count as silent.
pub const MIN_DECIBELS: f32 = -100.0;

/// Time-domain summary of one window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeFeatures {
    pub rms: f64,
    pub peak: f64,
    /// Sign changes per adjacent sample pair.
    pub zero_crossing_rate: f64,
}

/// Shape of a magnitude spectrum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpectralFeatures {
    pub centroid: f64,
    pub spread: f64,
    pub rolloff: f64,
}

pub fn time_features(samples: &[f32]) -> TimeFeatures {
    if samples.is_empty() {
        return TimeFeatures::default();
    }
    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f64;
    let mut crossings = 0usize;
    for (i, &s) in samples.iter().enumerate() {
        let s = s as f64;
        sum_sq += s * s;
        peak = peak.max(s.abs());
        if i > 0 && (samples[i - 1] >= 0.0) != (s >= 0.0) {
            crossings += 1;
        }
    }
    let zero_crossing_rate = if samples.len() > 1 {
        crossings as f64 / (samples.len() - 1) as f64
    } else {
        0.0
    };
    TimeFeatures {
        rms: (sum_sq / samples.len() as f64).sqrt(),
        peak,
        zero_crossing_rate,
    }
}

/// Linear magnitude → dB, floored at [`MIN_DECIBELS`].
pub fn linear_to_db(magnitude: f32) -> f32 {
    if magnitude <= 0.0 {
        return MIN_DECIBELS;
    }
    (20.0 * magnitude.log10()).max(MIN_DECIBELS)
}

/// dB → linear magnitude. Values at the floor map to exactly zero.
pub fn db_to_linear(db: f32) -> f32 {
    if db <= MIN_DECIBELS {
        0.0
    } else {
        10f32.powf(db / 20.0)
    }
}

/// Centroid, spread and rolloff of linear magnitudes.
///
/// Bin `i` sits at `i × bin_hz`. Rolloff is the first bin frequency at
/// which cumulative energy (magnitude squared) reaches `rolloff_percent`
/// of the total.
pub fn spectral_features(magnitudes: &[f32], bin_hz: f64, rolloff_percent: f64) -> SpectralFeatures {
    let mut total = 0.0f64;
    let mut weighted = 0.0f64;
    let mut energy = 0.0f64;
    for (i, &m) in magnitudes.iter().enumerate() {
        let m = m as f64;
        total += m;
        weighted += i as f64 * bin_hz * m;
        energy += m * m;
    }
    if total <= 0.0 {
        return SpectralFeatures::default();
    }
    let centroid = weighted / total;

    let variance = magnitudes
        .iter()
        .enumerate()
        .map(|(i, &m)| {
            let d = i as f64 * bin_hz - centroid;
            d * d * m as f64
        })
        .sum::<f64>()
        / total;

    let target = energy * rolloff_percent;
    let mut cumulative = 0.0f64;
    let mut rolloff = 0.0;
    for (i, &m) in magnitudes.iter().enumerate() {
        cumulative += (m as f64) * (m as f64);
        if cumulative >= target {
            rolloff = i as f64 * bin_hz;
            break;
        }
    }

    SpectralFeatures {
        centroid,
        spread: variance.sqrt(),
        rolloff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn square_wave_time_features() {
        let samples: Vec<f32> = (0..100).map(|i| if (i / 10) % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let f = time_features(&samples);
        assert_abs_diff_eq!(f.rms, 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(f.peak, 0.5, epsilon = 1e-9);
        // 9 sign changes across 99 adjacent pairs
        assert_abs_diff_eq!(f.zero_crossing_rate, 9.0 / 99.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_and_single_sample() {
        assert_eq!(time_features(&[]), TimeFeatures::default());
        let f = time_features(&[0.3]);
        assert_eq!(f.zero_crossing_rate, 0.0);
        assert_abs_diff_eq!(f.peak, 0.3, epsilon = 1e-6);
    }

    #[test]
    fn single_bin_spectrum() {
        let mut mags = vec![0.0f32; 64];
        mags[10] = 1.0;
        let f = spectral_features(&mags, 100.0, 0.85);
        assert_abs_diff_eq!(f.centroid, 1000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(f.spread, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(f.rolloff, 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn two_bins_spread_and_rolloff() {
        let mut mags = vec![0.0f32; 64];
        mags[10] = 1.0;
        mags[30] = 1.0;
        let f = spectral_features(&mags, 100.0, 0.85);
        assert_abs_diff_eq!(f.centroid, 2000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(f.spread, 1000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(f.rolloff, 3000.0, epsilon = 1e-9);
    }

    #[test]
    fn silent_spectrum() {
        assert_eq!(spectral_features(&[0.0; 16], 10.0, 0.85), SpectralFeatures::default());
    }

    #[test]
    fn decibel_conversions() {
        assert_abs_diff_eq!(linear_to_db(1.0), 0.0);
        assert_abs_diff_eq!(linear_to_db(0.1), -20.0, epsilon = 1e-4);
        assert_eq!(linear_to_db(0.0), MIN_DECIBELS);
        assert_eq!(db_to_linear(MIN_DECIBELS), 0.0);
        assert_abs_diff_eq!(db_to_linear(-20.0), 0.1, epsilon = 1e-6);
    }
}
