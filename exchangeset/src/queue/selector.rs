//! Size-class routing of fulfilment messages to storage instances.
//!
//! Messages are classed as small, medium or large by the size of the
//! requested exchange set, then spread round-robin over the instances
//! configured for that class.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::QueueConfig;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Size class of an exchange set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
}

impl SizeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bounds, in MB, of the small and medium classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassThresholds {
    pub small_max_mb: u64,
    pub medium_max_mb: u64,
}

impl Default for SizeClassThresholds {
    fn default() -> Self {
        Self {
            small_max_mb: 50,
            medium_max_mb: 300,
        }
    }
}

impl SizeClassThresholds {
    /// Class for an exchange set of `file_size` bytes. Bounds are inclusive.
    pub fn classify(&self, file_size: u64) -> SizeClass {
        if file_size <= self.small_max_mb.saturating_mul(BYTES_PER_MB) {
            SizeClass::Small
        } else if file_size <= self.medium_max_mb.saturating_mul(BYTES_PER_MB) {
            SizeClass::Medium
        } else {
            SizeClass::Large
        }
    }
}

/// Source of instance numbers for each size class.
pub trait InstanceCounter: Send + Sync {
    /// Next instance (1-based) for `class`.
    fn next_instance(&self, class: SizeClass) -> u32;
}

/// Round-robin counter over `1..=max`.
#[derive(Debug)]
pub struct RotatingCounter {
    max: u32,
    current: Mutex<u32>,
}

impl RotatingCounter {
    pub fn new(max: u32) -> Self {
        Self {
            max: max.max(1),
            current: Mutex::new(0),
        }
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    /// Advance and return the next value, starting over at 1 after `max`.
    pub fn next(&self) -> u32 {
        let mut current = self.current.lock();
        if *current >= self.max {
            *current = 0;
        }
        *current += 1;
        *current
    }
}

/// One [`RotatingCounter`] per size class.
#[derive(Debug)]
pub struct ClassCounters {
    small: RotatingCounter,
    medium: RotatingCounter,
    large: RotatingCounter,
}

impl ClassCounters {
    pub fn new(small: u32, medium: u32, large: u32) -> Self {
        Self {
            small: RotatingCounter::new(small),
            medium: RotatingCounter::new(medium),
            large: RotatingCounter::new(large),
        }
    }
}

impl InstanceCounter for ClassCounters {
    fn next_instance(&self, class: SizeClass) -> u32 {
        match class {
            SizeClass::Small => self.small.next(),
            SizeClass::Medium => self.medium.next(),
            SizeClass::Large => self.large.next(),
        }
    }
}

/// Where a fulfilment message is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoute {
    pub class: SizeClass,
    pub instance: u32,
}

impl StorageRoute {
    /// Queue name for this route, e.g. `small-2`.
    pub fn queue_name(&self) -> String {
        format!("{}-{}", self.class, self.instance)
    }
}

/// Picks a size class and instance for each message.
#[derive(Clone)]
pub struct StorageAccountSelector {
    thresholds: SizeClassThresholds,
    counter: Arc<dyn InstanceCounter>,
}

impl StorageAccountSelector {
    pub fn new(thresholds: SizeClassThresholds, counter: Arc<dyn InstanceCounter>) -> Self {
        Self {
            thresholds,
            counter,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.thresholds,
            Arc::new(ClassCounters::new(
                config.small_instances,
                config.medium_instances,
                config.large_instances,
            )),
        )
    }

    pub fn route(&self, file_size: u64) -> StorageRoute {
        let class = self.thresholds.classify(file_size);
        StorageRoute {
            class,
            instance: self.counter.next_instance(class),
        }
    }
}
