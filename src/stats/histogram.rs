//! Operation latency histogram
//!
//! Microsecond latencies are accumulated into fractional log2 buckets:
//! bucket `i` covers `[2^(i/4), 2^((i+1)/4))` microseconds, giving 112
//! buckets up to 2^28 us (~268 s). Precision shrinks for higher latencies,
//! which is fine for a benchmark summary. Min/avg/max are always valid;
//! the histogram view and percentiles must only be used after checking
//! `exceeded()`.
//!
//! The fixed bucket array is what travels over the wire between service and
//! master, so adding two histograms is component-wise and loses nothing.

use serde::{Deserialize, Serialize};

/// log2 1/n increments between buckets (4 means 0.25).
pub const BUCKET_FRACTION: usize = 4;

/// Max microsecond latency in the histogram is 2^28 us.
pub const MAX_LOG2_USEC: usize = 28;

/// Number of available buckets.
pub const NUM_BUCKETS: usize = MAX_LOG2_USEC * BUCKET_FRACTION;

/// Latency histogram with fractional log2 microsecond buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyHistogram {
    #[serde(with = "bucket_array")]
    buckets: [u64; NUM_BUCKETS],
    num_values: u64,
    sum_usec: u64,
    min_usec: u64,
    max_usec: u64,
}

// serde lacks impls for arrays this long, so go through a slice/vec.
mod bucket_array {
    use super::NUM_BUCKETS;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(arr: &[u64; NUM_BUCKETS], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        arr.as_slice().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u64; NUM_BUCKETS], D::Error>
    where
        D: Deserializer<'de>,
    {
        let vec: Vec<u64> = Vec::deserialize(deserializer)?;
        if vec.len() != NUM_BUCKETS {
            return Err(serde::de::Error::custom(format!(
                "expected {} histogram buckets, got {}",
                NUM_BUCKETS,
                vec.len()
            )));
        }
        let mut arr = [0u64; NUM_BUCKETS];
        arr.copy_from_slice(&vec);
        Ok(arr)
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: [0; NUM_BUCKETS],
            num_values: 0,
            sum_usec: 0,
            // any first value is smaller
            min_usec: u64::MAX,
            max_usec: 0,
        }
    }

    /// Bucket index for a microsecond latency: floor(log2(v) * 4), clamped.
    /// log2(0) does not exist, so 0 maps to bucket 0.
    #[inline]
    fn bucket_index(latency_usec: u64) -> usize {
        if latency_usec == 0 {
            return 0;
        }

        let index = ((latency_usec as f64).log2() * BUCKET_FRACTION as f64) as usize;
        index.min(NUM_BUCKETS - 1)
    }

    #[inline]
    pub fn add_latency(&mut self, latency_usec: u64) {
        self.num_values += 1;
        self.sum_usec += latency_usec;

        if latency_usec < self.min_usec {
            self.min_usec = latency_usec;
        }
        if latency_usec > self.max_usec {
            self.max_usec = latency_usec;
        }

        self.buckets[Self::bucket_index(latency_usec)] += 1;
    }

    pub fn num_values(&self) -> u64 {
        self.num_values
    }

    pub fn is_empty(&self) -> bool {
        self.num_values == 0
    }

    pub fn min_usec(&self) -> u64 {
        if self.num_values == 0 {
            0
        } else {
            self.min_usec
        }
    }

    pub fn max_usec(&self) -> u64 {
        self.max_usec
    }

    pub fn sum_usec(&self) -> u64 {
        self.sum_usec
    }

    pub fn average_usec(&self) -> u64 {
        if self.num_values == 0 {
            0
        } else {
            self.sum_usec / self.num_values
        }
    }

    pub fn buckets(&self) -> &[u64; NUM_BUCKETS] {
        &self.buckets
    }

    /// A count in the highest bucket means latencies potentially exceeded the
    /// histogram range. Min/avg/max remain valid, but the histogram view and
    /// percentiles are suppressed.
    pub fn exceeded(&self) -> bool {
        self.buckets[NUM_BUCKETS - 1] != 0
    }

    /// Upper latency bound in microseconds for the given percentage of
    /// values. Only meaningful when `exceeded()` is false.
    pub fn percentile(&self, percentage: f64) -> f64 {
        if self.num_values == 0 {
            return 0.0;
        }

        let mut values_so_far = 0u64;

        for (index, &count) in self.buckets.iter().enumerate() {
            values_so_far += count;

            let fraction_so_far = values_so_far as f64 / self.num_values as f64;
            if fraction_so_far >= percentage / 100.0 {
                return bucket_upper_bound_usec(index);
            }
        }

        0.0
    }

    /// Compact "upper_bound: count" listing of the non-empty buckets.
    pub fn histogram_str(&self) -> String {
        if self.exceeded() {
            return "Histogram size exceeded".to_string();
        }

        let mut parts = Vec::new();

        for (index, &count) in self.buckets.iter().enumerate() {
            if count == 0 {
                continue;
            }

            let bound = bucket_upper_bound_usec(index);
            if bound < 10.0 {
                parts.push(format!("{bound:.1}: {count}"));
            } else {
                parts.push(format!("{bound:.0}: {count}"));
            }
        }

        parts.join(", ")
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Rebuild a histogram from its wire components. `min_usec` of an
    /// empty histogram may arrive as 0 and is normalized so later merges
    /// stay correct.
    pub fn from_raw_parts(
        buckets: [u64; NUM_BUCKETS],
        num_values: u64,
        sum_usec: u64,
        min_usec: u64,
        max_usec: u64,
    ) -> Self {
        Self {
            buckets,
            num_values,
            sum_usec,
            min_usec: if num_values == 0 { u64::MAX } else { min_usec },
            max_usec,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::AddAssign<&LatencyHistogram> for LatencyHistogram {
    fn add_assign(&mut self, rhs: &LatencyHistogram) {
        for (bucket, &other) in self.buckets.iter_mut().zip(rhs.buckets.iter()) {
            *bucket += other;
        }

        self.num_values += rhs.num_values;
        self.sum_usec += rhs.sum_usec;

        if rhs.min_usec < self.min_usec {
            self.min_usec = rhs.min_usec;
        }
        if rhs.max_usec > self.max_usec {
            self.max_usec = rhs.max_usec;
        }
    }
}

/// Upper microsecond bound of bucket `index`: 2^((index+1)/4).
pub fn bucket_upper_bound_usec(index: usize) -> f64 {
    2f64.powf((index + 1) as f64 / BUCKET_FRACTION as f64)
}
