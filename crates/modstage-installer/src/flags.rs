use std::ops::BitOr;

/// Which lifecycle hooks an installer run may invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstallFlags(u8);

impl InstallFlags {
    pub const NONE: Self = Self(0);
    pub const INSTALL: Self = Self(1);
    pub const UPGRADE: Self = Self(2);
    pub const REMOVE: Self = Self(4);
    pub const ALL: Self = Self(7);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for InstallFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for InstallFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
