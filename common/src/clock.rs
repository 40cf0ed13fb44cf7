use crate::types::Timestamp;

/// Period of the 32-bit millisecond counter.
pub const DEFAULT_TICK_MODULUS_MS: u64 = 1 << 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub now: Timestamp,
    pub wrapped: bool,
}

/// Extends a wrapping hardware tick counter into a non-decreasing timestamp.
#[derive(Debug, Clone)]
pub struct Clock {
    modulus: u64,
    epoch: u64,
    last_raw: Option<u64>,
    now: Timestamp,
}

impl Clock {
    pub fn new(modulus: u64) -> Self {
        Self {
            modulus: modulus.max(1),
            epoch: 0,
            last_raw: None,
            now: 0,
        }
    }

    /// Feeds a raw counter value. A value below the previous one means the
    /// counter rolled over exactly once since the last observation.
    pub fn observe(&mut self, raw_tick: u64) -> ClockReading {
        let raw = raw_tick % self.modulus;
        let wrapped = matches!(self.last_raw, Some(last) if raw < last);
        if wrapped {
            self.epoch += 1;
        }
        self.last_raw = Some(raw);
        self.now = self.epoch * self.modulus + raw;

        ClockReading {
            now: self.now,
            wrapped,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// Forward distance from `earlier` to `later`. When `later` is smaller the
    /// two are assumed to straddle exactly one counter wrap.
    pub fn elapsed(&self, later: Timestamp, earlier: Timestamp) -> u64 {
        if later >= earlier {
            later - earlier
        } else {
            self.modulus.saturating_sub(earlier).saturating_add(later)
        }
    }

    pub fn since(&self, earlier: Timestamp) -> u64 {
        self.elapsed(self.now, earlier)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_MODULUS_MS)
    }
}
