//! Advertised accessory flags and category.
//!
//! These values end up in the `_hap._tcp` TXT record: `ff` (feature flags),
//! `sf` (status flags) and `ci` (category identifier).

/// Pairing feature flags (`ff` TXT field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags(pub u8);

impl FeatureFlags {
    pub const SUPPORTS_HARDWARE_AUTH: u8 = 1 << 0;
    pub const SUPPORTS_SOFTWARE_AUTH: u8 = 1 << 1;

    /// Get raw value.
    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn supports_software_auth(&self) -> bool {
        self.0 & Self::SUPPORTS_SOFTWARE_AUTH != 0
    }
}

/// Status flags (`sf` TXT field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    pub const NOT_PAIRED: u8 = 1 << 0;
    pub const WIFI_NOT_CONFIGURED: u8 = 1 << 1;
    pub const PROBLEM_DETECTED: u8 = 1 << 2;

    /// Flags for an accessory with the given pairing status.
    pub fn for_pairing(paired: bool) -> Self {
        if paired {
            Self(0)
        } else {
            Self(Self::NOT_PAIRED)
        }
    }

    /// Get raw value.
    pub fn raw(&self) -> u8 {
        self.0
    }

    pub fn is_paired(&self) -> bool {
        self.0 & Self::NOT_PAIRED == 0
    }
}

/// Accessory category identifier (`ci` TXT field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category(pub u16);

impl Category {
    pub const OTHER: Self = Self(1);
    pub const BRIDGE: Self = Self(2);
    pub const FAN: Self = Self(3);
    pub const GARAGE_DOOR_OPENER: Self = Self(4);
    pub const LIGHTBULB: Self = Self(5);
    pub const DOOR_LOCK: Self = Self(6);
    pub const OUTLET: Self = Self(7);
    pub const SWITCH: Self = Self(8);
    pub const THERMOSTAT: Self = Self(9);
    pub const SENSOR: Self = Self(10);

    /// Get raw value.
    pub fn raw(&self) -> u16 {
        self.0
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::OTHER
    }
}
