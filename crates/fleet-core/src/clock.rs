use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub type EpochMs = i64;

pub fn local_now_ms() -> EpochMs {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as i64
}

/// Local clock corrected by a fixed offset towards the authoritative store's
/// clock. The offset is measured once per connection and never re-read, so all
/// lease comparisons made through one session agree with each other.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SkewClock {
    offset_ms: i64,
}

impl SkewClock {
    pub fn measure(store_now: EpochMs, local_now: EpochMs) -> Self {
        Self { offset_ms: store_now - local_now }
    }

    pub fn from_offset(offset_ms: i64) -> Self {
        Self { offset_ms }
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    pub fn now_ms(&self) -> EpochMs {
        self.adjust(local_now_ms())
    }

    pub fn adjust(&self, local: EpochMs) -> EpochMs {
        local + self.offset_ms
    }
}
