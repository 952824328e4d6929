use serde::{Deserialize, Serialize};

use crate::codec::LENGTH_PREFIX_LEN;

// Rates applied once injection is switched on
const DROP_RATE_PERCENT: f32 = 2.0;
const CORRUPT_RATE_PERCENT: f32 = 1.0;
const DEFAULT_SEED: u64 = 0x1234_5678_9ABC_DEF0;

/// Flipped into a corrupted frame's tag so it decodes as an unknown tag.
const CORRUPTION_MASK: u8 = 0x80;

/// Configuration for link fault injection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkFaultConfig {
    pub enabled: bool,
    pub drop_percent: f32,
    pub corrupt_percent: f32,
    pub seed: u64,
}

impl Default for LinkFaultConfig {
    fn default() -> Self {
        Self {
            // A real link is assumed clean
            enabled: false,
            drop_percent: DROP_RATE_PERCENT,
            corrupt_percent: CORRUPT_RATE_PERCENT,
            seed: DEFAULT_SEED,
        }
    }
}

/// What happened to one outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFate {
    Delivered,
    Dropped,
    Corrupted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFaultStats {
    pub frames_seen: u32,
    pub frames_dropped: u32,
    pub frames_corrupted: u32,
}

/// Deterministic drop/corrupt decisions for encoded frames.
///
/// Corruption rewrites the tag byte only, so the length prefix stays intact
/// and the receiver sees one recoverable decode error.
#[derive(Debug)]
pub struct LinkFaultInjector {
    config: LinkFaultConfig,
    stats: LinkFaultStats,
    // Simple Linear Congruential Generator for reproducible runs
    rng_state: u64,
}

impl LinkFaultInjector {
    pub fn new(config: LinkFaultConfig) -> Self {
        Self {
            rng_state: config.seed,
            config,
            stats: LinkFaultStats::default(),
        }
    }

    /// Decides the fate of one complete encoded frame, corrupting it in place if chosen.
    pub fn apply(&mut self, frame: &mut [u8]) -> FrameFate {
        if !self.config.enabled || frame.len() <= LENGTH_PREFIX_LEN {
            return FrameFate::Delivered;
        }
        self.stats.frames_seen += 1;

        if self.roll(self.config.drop_percent) {
            self.stats.frames_dropped += 1;
            return FrameFate::Dropped;
        }
        if self.roll(self.config.corrupt_percent) {
            frame[LENGTH_PREFIX_LEN] ^= CORRUPTION_MASK;
            self.stats.frames_corrupted += 1;
            return FrameFate::Corrupted;
        }
        FrameFate::Delivered
    }

    pub fn stats(&self) -> &LinkFaultStats {
        &self.stats
    }

    pub fn config(&self) -> &LinkFaultConfig {
        &self.config
    }

    fn roll(&mut self, rate_percent: f32) -> bool {
        self.random_float() < (rate_percent / 100.0)
    }

    fn next_random(&mut self) -> u64 {
        // Linear Congruential Generator: X(n+1) = (aX(n) + c) mod m
        // Using parameters from Numerical Recipes
        self.rng_state = self.rng_state.wrapping_mul(1664525).wrapping_add(1013904223);
        self.rng_state
    }

    fn random_float(&mut self) -> f32 {
        (self.next_random() >> 40) as f32 / (1u64 << 24) as f32
    }
}

impl Default for LinkFaultInjector {
    fn default() -> Self {
        Self::new(LinkFaultConfig::default())
    }
}
