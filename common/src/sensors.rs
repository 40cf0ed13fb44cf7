use std::collections::BTreeMap;

use crate::types::{SensorId, Timestamp};

/// Wire value of a sensor that has never produced an accepted sample.
pub const UNKNOWN_SENSOR_VALUE: i16 = -127;

pub const HISTORY_LEN: usize = 16;
pub const DEFAULT_NOISE_THRESHOLD: i16 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Wired sensor, each sample replaces the previous value.
    Direct,
    /// Noisy analog input averaged over a spike-rejecting history.
    Filtered { noise_threshold: i16 },
    /// Two-state input; reports carry the time of the last change.
    Binary,
    /// Value pushed by another node over the network.
    Remote,
}

#[derive(Debug, Clone)]
struct History {
    slots: [Option<i16>; HISTORY_LEN],
    cursor: usize,
    noise_threshold: i16,
}

impl History {
    fn new(noise_threshold: i16) -> Self {
        Self {
            slots: [None; HISTORY_LEN],
            cursor: 0,
            noise_threshold,
        }
    }

    /// Gates the sample against the slot just behind the cursor. The cursor
    /// advances either way, so a spike ages out after one pass.
    fn push(&mut self, value: i16) -> bool {
        let previous = self.slots[(self.cursor + HISTORY_LEN - 1) % HISTORY_LEN];
        let accepted = match previous {
            None => true,
            Some(previous) => {
                (i32::from(value) - i32::from(previous)).abs() < i32::from(self.noise_threshold)
            }
        };
        if accepted {
            self.slots[self.cursor] = Some(value);
        }
        self.cursor = (self.cursor + 1) % HISTORY_LEN;
        accepted
    }

    fn average(&self) -> Option<i16> {
        let (sum, count) = self
            .slots
            .iter()
            .flatten()
            .fold((0i32, 0i32), |(sum, count), v| (sum + i32::from(*v), count + 1));
        if count == 0 {
            return None;
        }
        let mean = f64::from(sum) / f64::from(count);
        Some(mean.round() as i16)
    }
}

#[derive(Debug, Clone)]
struct Reading {
    kind: SensorKind,
    value: Option<i16>,
    sampled_at: Option<Timestamp>,
    changed_at: Option<Timestamp>,
    calibration: f64,
    history: Option<History>,
}

impl Reading {
    fn new(kind: SensorKind) -> Self {
        let history = match kind {
            SensorKind::Filtered { noise_threshold } => Some(History::new(noise_threshold)),
            _ => None,
        };
        Self {
            kind,
            value: None,
            sampled_at: None,
            changed_at: None,
            calibration: 1.0,
            history,
        }
    }
}

/// Outcome of feeding one sample into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    Accepted { changed: bool },
    Rejected,
    Unregistered,
}

#[derive(Debug, Clone, Default)]
pub struct SensorCache {
    readings: BTreeMap<SensorId, Reading>,
}

impl SensorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: SensorId, kind: SensorKind) {
        self.readings.insert(id, Reading::new(kind));
    }

    pub fn contains(&self, id: SensorId) -> bool {
        self.readings.contains_key(&id)
    }

    pub fn kind(&self, id: SensorId) -> Option<SensorKind> {
        self.readings.get(&id).map(|reading| reading.kind)
    }

    pub fn ids(&self) -> impl Iterator<Item = SensorId> + '_ {
        self.readings.keys().copied()
    }

    /// Applies the calibration factor to a raw sample and stores it.
    pub fn record(&mut self, id: SensorId, raw: f64, now: Timestamp) -> Recorded {
        let Some(reading) = self.readings.get_mut(&id) else {
            return Recorded::Unregistered;
        };
        if !raw.is_finite() {
            return Recorded::Rejected;
        }

        let calibrated = (raw * reading.calibration).round();
        let sample = calibrated.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        let previous = reading.value;

        match reading.history.as_mut() {
            Some(history) => {
                if !history.push(sample) {
                    return Recorded::Rejected;
                }
                reading.value = history.average();
            }
            None => reading.value = Some(sample),
        }

        reading.sampled_at = Some(now);
        let changed = previous != reading.value;
        if changed || reading.changed_at.is_none() {
            reading.changed_at = Some(now);
        }
        Recorded::Accepted { changed }
    }

    /// Marks a wired sensor as unreadable for this cycle.
    pub fn record_unknown(&mut self, id: SensorId) {
        if let Some(reading) = self.readings.get_mut(&id) {
            if reading.history.is_none() {
                reading.value = None;
            }
        }
    }

    /// Stores a value received from another node. No calibration applies.
    pub fn set_external(&mut self, id: SensorId, value: i16, now: Timestamp) -> bool {
        match self.readings.get_mut(&id) {
            Some(reading) if reading.kind == SensorKind::Remote => {
                if reading.value != Some(value) || reading.changed_at.is_none() {
                    reading.changed_at = Some(now);
                }
                reading.value = Some(value);
                reading.sampled_at = Some(now);
                true
            }
            _ => false,
        }
    }

    pub fn value(&self, id: SensorId) -> Option<i16> {
        self.readings.get(&id).and_then(|reading| reading.value)
    }

    /// Mean of the accepted history, or the single value for unfiltered sensors.
    pub fn average(&self, id: SensorId) -> Option<i16> {
        let reading = self.readings.get(&id)?;
        match &reading.history {
            Some(history) => history.average(),
            None => reading.value,
        }
    }

    pub fn sampled_at(&self, id: SensorId) -> Option<Timestamp> {
        self.readings.get(&id).and_then(|reading| reading.sampled_at)
    }

    pub fn changed_at(&self, id: SensorId) -> Option<Timestamp> {
        self.readings.get(&id).and_then(|reading| reading.changed_at)
    }

    pub fn is_valid(&self, id: SensorId, max_age_ms: u64, now: Timestamp) -> bool {
        self.fresh_value(id, max_age_ms, now).is_some()
    }

    pub fn fresh_value(&self, id: SensorId, max_age_ms: u64, now: Timestamp) -> Option<i16> {
        let reading = self.readings.get(&id)?;
        let sampled_at = reading.sampled_at?;
        if now.saturating_sub(sampled_at) <= max_age_ms {
            reading.value
        } else {
            None
        }
    }

    pub fn calibration(&self, id: SensorId) -> f64 {
        self.readings
            .get(&id)
            .map(|reading| reading.calibration)
            .unwrap_or(1.0)
    }

    pub fn set_calibration(&mut self, id: SensorId, factor: f64) {
        if let Some(reading) = self.readings.get_mut(&id) {
            reading.calibration = sanitize_calibration(factor);
        }
    }
}

pub fn sanitize_calibration(factor: f64) -> f64 {
    if factor.is_nan() || factor <= 0.0 {
        1.0
    } else {
        factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TANK: SensorId = SensorId(56);

    fn filtered_cache() -> SensorCache {
        let mut cache = SensorCache::new();
        cache.register(
            TANK,
            SensorKind::Filtered {
                noise_threshold: DEFAULT_NOISE_THRESHOLD,
            },
        );
        cache
    }

    #[test]
    fn unknown_until_first_sample() {
        let cache = filtered_cache();
        assert_eq!(cache.average(TANK), None);
        assert!(!cache.is_valid(TANK, 1_000, 0));
    }

    #[test]
    fn outlier_is_kept_out_of_the_average() {
        let mut cache = filtered_cache();
        for t in 0..5 {
            cache.record(TANK, 40.0, t);
        }
        assert_eq!(cache.record(TANK, 61.0, 5), Recorded::Rejected);
        cache.record(TANK, 40.0, 6);
        assert_eq!(cache.average(TANK), Some(40));
    }

    #[test]
    fn spike_as_first_sample_ages_out() {
        let mut cache = filtered_cache();
        assert_eq!(
            cache.record(TANK, 85.0, 0),
            Recorded::Accepted { changed: true }
        );
        assert_eq!(cache.record(TANK, 40.0, 1), Recorded::Rejected);
        assert!(matches!(cache.record(TANK, 40.0, 2), Recorded::Accepted { .. }));
        for t in 3..(2 * HISTORY_LEN as u64) {
            cache.record(TANK, 40.0, t);
        }
        assert_eq!(cache.average(TANK), Some(40));
        assert_eq!(cache.sampled_at(TANK), Some(2 * HISTORY_LEN as u64 - 1));
    }

    #[test]
    fn consecutive_samples_within_threshold_are_both_accepted() {
        let mut cache = filtered_cache();
        cache.record(TANK, 40.0, 0);
        assert!(matches!(cache.record(TANK, 55.0, 1), Recorded::Accepted { .. }));
        assert!(matches!(cache.record(TANK, 70.0, 2), Recorded::Accepted { .. }));
        // (40 + 55 + 70) / 3 = 55
        assert_eq!(cache.average(TANK), Some(55));
    }

    #[test]
    fn average_rounds_half_up() {
        let mut cache = filtered_cache();
        cache.record(TANK, 40.0, 0);
        cache.record(TANK, 41.0, 1);
        assert_eq!(cache.average(TANK), Some(41));
    }

    #[test]
    fn history_overwrites_oldest_slot() {
        let mut cache = filtered_cache();
        for t in 0..HISTORY_LEN as u64 {
            cache.record(TANK, 30.0, t);
        }
        for t in 0..HISTORY_LEN as u64 {
            cache.record(TANK, 40.0, 100 + t);
        }
        assert_eq!(cache.average(TANK), Some(40));
    }

    #[test]
    fn calibration_scales_raw_samples() {
        let mut cache = SensorCache::new();
        cache.register(TANK, SensorKind::Direct);
        cache.set_calibration(TANK, 1.1);
        cache.record(TANK, 50.0, 0);
        assert_eq!(cache.value(TANK), Some(55));
    }

    #[test]
    fn invalid_calibration_falls_back_to_unity() {
        let mut cache = SensorCache::new();
        cache.register(TANK, SensorKind::Direct);
        cache.set_calibration(TANK, f64::NAN);
        assert_eq!(cache.calibration(TANK), 1.0);
        cache.set_calibration(TANK, -2.0);
        assert_eq!(cache.calibration(TANK), 1.0);
    }

    #[test]
    fn validity_window_expires() {
        let mut cache = SensorCache::new();
        cache.register(SensorId(74), SensorKind::Remote);
        assert!(cache.set_external(SensorId(74), 21, 1_000));
        assert!(cache.is_valid(SensorId(74), 500, 1_400));
        assert!(!cache.is_valid(SensorId(74), 500, 1_600));
    }

    #[test]
    fn external_updates_only_reach_remote_sensors() {
        let mut cache = SensorCache::new();
        cache.register(TANK, SensorKind::Direct);
        assert!(!cache.set_external(TANK, 21, 0));
        assert!(!cache.set_external(SensorId(99), 21, 0));
        assert_eq!(cache.value(TANK), None);
    }

    #[test]
    fn binary_change_time_tracks_transitions() {
        let mut cache = SensorCache::new();
        cache.register(SensorId(60), SensorKind::Binary);
        cache.record(SensorId(60), 0.0, 100);
        cache.record(SensorId(60), 0.0, 200);
        assert_eq!(cache.changed_at(SensorId(60)), Some(100));
        assert_eq!(
            cache.record(SensorId(60), 1.0, 300),
            Recorded::Accepted { changed: true }
        );
        assert_eq!(cache.changed_at(SensorId(60)), Some(300));
    }

    #[test]
    fn unreadable_direct_sensor_becomes_unknown() {
        let mut cache = SensorCache::new();
        cache.register(TANK, SensorKind::Direct);
        cache.record(TANK, 30.0, 0);
        cache.record_unknown(TANK);
        assert_eq!(cache.value(TANK), None);
    }
}
