use serde::{Deserialize, Serialize};

/// Extent map configuration.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmapConfig {
    /// When to check the whole chain of an object after modifying it.
    ///
    /// The check walks every segment of the object, so it is expensive for
    /// objects with many segments.
    pub verify: VerifyMode,

    /// Largest checksum, in bytes, kept for one data unit.
    ///
    /// Together with `max_checksum_units` this bounds the size of a record,
    /// which [`credit`](crate::credit::credit) relies on.  The default is 64.
    pub max_checksum_size: u64,

    /// Largest number of data units a single segment keeps checksums for.
    ///
    /// The default is 8.
    pub max_checksum_units: u64,
}

impl Default for EmapConfig {
    fn default() -> Self {
        Self {
            verify: VerifyMode::default(),
            max_checksum_size: 64,
            max_checksum_units: 8,
        }
    }
}

impl EmapConfig {
    /// Largest checksum buffer one segment may carry.
    pub fn max_checksum_bytes(&self) -> u64 {
        self.max_checksum_size.saturating_mul(self.max_checksum_units)
    }

    /// Returns true if mutating operations should check the object's chain.
    pub fn should_verify(&self) -> bool {
        match self.verify {
            VerifyMode::Never => false,
            VerifyMode::DebugOnly => cfg!(debug_assertions),
            VerifyMode::Always => true,
        }
    }
}

/// When to run the full chain check.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Never check.
    Never,

    /// Check in builds with debug assertions enabled.
    #[default]
    DebugOnly,

    /// Always check.
    Always,
}
