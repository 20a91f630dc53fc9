use std::fmt;

// ─── Status Code ────────────────────────────────────────────────────

/// Declared restriction tier of a player, as published to the status store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Iron
    Im,
    /// Hardcore iron
    Hcim,
    /// Ultimate iron
    Uim,
    /// Hardcore ultimate iron
    Hcuim,
    /// Group iron
    Gim,
    /// Hardcore group iron
    Hcgim,
    /// Ultimate group iron
    Ugim,
    /// Hardcore ultimate group iron
    Hcugim,
    Unknown,
}

impl StatusCode {
    pub const ALL: [StatusCode; 8] = [
        Self::Im,
        Self::Hcim,
        Self::Uim,
        Self::Hcuim,
        Self::Gim,
        Self::Hcgim,
        Self::Ugim,
        Self::Hcugim,
    ];

    /// Parse the raw text body returned by the lookup endpoint.
    /// Empty or unrecognised bodies map to `Unknown`.
    pub fn from_wire(raw: &str) -> Self {
        let code = raw.trim().trim_matches('"');
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(code))
            .unwrap_or(Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Im => "IM",
            Self::Hcim => "HCIM",
            Self::Uim => "UIM",
            Self::Hcuim => "HCUIM",
            Self::Gim => "GIM",
            Self::Hcgim => "HCGIM",
            Self::Ugim => "UGIM",
            Self::Hcugim => "HCUGIM",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Self::Unknown
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Gim | Self::Hcgim | Self::Ugim | Self::Hcugim)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
