//! Built-in virtual listeners for `audiometry run --simulate`.

use audiometry_core::config::STANDARD_FREQUENCIES;
use audiometry_core::{record_threshold, Ear, ThresholdMap};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Flat 10 dB HL at every frequency.
    Normal,
    /// Noise notch around 4 kHz in the left ear.
    Notch,
    /// Gradual high-frequency loss in both ears.
    Sloping,
}

impl Profile {
    /// True per-ear thresholds of the virtual listener.
    pub fn thresholds(self) -> ThresholdMap {
        let mut map = ThresholdMap::new();
        for &frequency in STANDARD_FREQUENCIES.iter() {
            for ear in Ear::BOTH {
                record_threshold(&mut map, frequency, ear, self.threshold_at(frequency, ear));
            }
        }
        map
    }

    fn threshold_at(self, frequency: u32, ear: Ear) -> i32 {
        match self {
            Profile::Normal => 10,
            Profile::Notch => match (frequency, ear) {
                (4000, Ear::Left) => 45,
                (3000 | 6000, Ear::Left) => 25,
                _ => 10,
            },
            Profile::Sloping => match frequency {
                f if f <= 1000 => 10,
                f if f <= 2000 => 20,
                f if f <= 4000 => 35,
                f if f <= 8000 => 50,
                _ => 65,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notch_profile_dips_left_ear_only() {
        let map = Profile::Notch.thresholds();
        assert_eq!(map[&4000].left, Some(45));
        assert_eq!(map[&4000].right, Some(10));
        assert_eq!(map.len(), STANDARD_FREQUENCIES.len());
    }

    #[test]
    fn sloping_profile_worsens_with_frequency() {
        let map = Profile::Sloping.thresholds();
        let left: Vec<i32> = map.values().filter_map(|t| t.left).collect();
        assert!(left.windows(2).all(|w| w[0] <= w[1]));
    }
}
