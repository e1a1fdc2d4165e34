//! Logger model table.
//!
//! The model query returns a one-byte code. Each known code fixes the number
//! of flash blocks a purge scans and whether the purge close sequence needs
//! the extra `0x1d` sub-command.

use {crate::purge::PurgeVariant, std::fmt};

/// Known logger models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Model {
    /// GT-100. Smallest flash, assumed until the model query answers.
    #[default]
    Gt100,
    /// GT-200.
    Gt200,
    /// GT-120.
    Gt120,
    /// GT-200e and GT-600 share one code.
    Gt200e,
}

impl Model {
    /// All known models, in model-code order.
    pub const ALL: [Self; 4] = [Self::Gt100, Self::Gt200, Self::Gt120, Self::Gt200e];

    /// Flash size of the largest known model, in blocks.
    pub const MAX_BLOCK_COUNT: u32 = 0x700;

    /// Look up a model by the code the model query returns.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x13 => Some(Self::Gt100),
            0x14 => Some(Self::Gt200),
            0x15 => Some(Self::Gt120),
            0x17 => Some(Self::Gt200e),
            _ => None,
        }
    }

    /// Model code as reported by the device.
    #[must_use]
    pub fn code(&self) -> u8 {
        match self {
            Self::Gt100 => 0x13,
            Self::Gt200 => 0x14,
            Self::Gt120 => 0x15,
            Self::Gt200e => 0x17,
        }
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gt100 => "GT-100",
            Self::Gt200 => "GT-200",
            Self::Gt120 => "GT-120",
            Self::Gt200e => "GT-200e/GT-600",
        }
    }

    /// Number of erasable flash blocks.
    #[must_use]
    pub fn block_count(&self) -> u32 {
        match self {
            Self::Gt100 => 0x080,
            Self::Gt200 => 0x200,
            Self::Gt120 => 0x100,
            Self::Gt200e => 0x700,
        }
    }

    /// Whether the purge close sequence must include the `0x1d` sub-command.
    pub fn needs_extra_purge_command(&self) -> bool {
        matches!(self, Self::Gt200e)
    }

    /// Purge variant selected for this model.
    ///
    /// Every known model runs the generic sequence. The legacy sequence is
    /// only used on explicit request, see [`Session::with_purge_variant`].
    ///
    /// [`Session::with_purge_variant`]: crate::Session::with_purge_variant
    pub fn purge_variant(&self) -> PurgeVariant {
        match self {
            Self::Gt100 | Self::Gt200 | Self::Gt120 | Self::Gt200e => PurgeVariant::Generic,
        }
    }

    /// Get the model from a string name ("gt200", "GT-200e", "gt600").
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "gt100" => Some(Self::Gt100),
            "gt200" => Some(Self::Gt200),
            "gt120" => Some(Self::Gt120),
            "gt200e" | "gt600" | "gt200egt600" => Some(Self::Gt200e),
            _ => None,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_table() {
        assert_eq!(Model::from_code(0x13), Some(Model::Gt100));
        assert_eq!(Model::from_code(0x14).map(|m| m.block_count()), Some(0x200));
        assert_eq!(Model::from_code(0x15).map(|m| m.block_count()), Some(0x100));
        assert_eq!(Model::from_code(0x16), None);

        let big = Model::from_code(0x17).unwrap();
        assert_eq!(big.name(), "GT-200e/GT-600");
        assert_eq!(big.block_count(), 0x700);
        assert!(big.needs_extra_purge_command());
    }

    #[test]
    fn test_model_codes_round_trip_through_table() {
        for model in Model::ALL {
            assert_eq!(Model::from_code(model.code()), Some(model));
        }
    }

    #[test]
    fn test_default_is_smallest_model() {
        let default = Model::default();
        assert_eq!(default, Model::Gt100);
        assert!(Model::ALL.iter().all(|m| m.block_count() >= default.block_count()));
        assert!(!default.needs_extra_purge_command());
    }

    #[test]
    fn test_max_block_count_covers_every_model() {
        let largest = Model::ALL
            .iter()
            .map(Model::block_count)
            .max();
        assert_eq!(largest, Some(Model::MAX_BLOCK_COUNT));
    }

    #[test]
    fn test_every_model_defaults_to_generic_purge() {
        assert!(
            Model::ALL
                .iter()
                .all(|m| m.purge_variant() == PurgeVariant::Generic)
        );
    }

    #[test]
    fn test_model_from_name() {
        assert_eq!(Model::from_name("GT-200"), Some(Model::Gt200));
        assert_eq!(Model::from_name("gt600"), Some(Model::Gt200e));
        assert_eq!(Model::from_name("gt-900"), None);
    }
}
