use std::fmt;

use anyhow::{anyhow, Context, Result};
use semver::Version;

/// Parses a module version leniently.
///
/// Module authors write versions like `1`, `1.2`, `1.2.3` or `1.2.3pre`;
/// missing components are padded with zero and a trailing suffix becomes
/// a pre-release tag, so `1.2rc1` parses as `1.2.0-rc1`.
pub fn parse_module_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("module version must not be empty"));
    }

    let split_at = trimmed
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(trimmed.len());
    let (numeric, suffix) = trimmed.split_at(split_at);
    let numeric = numeric.trim_end_matches('.');

    let components = numeric.split('.').collect::<Vec<_>>();
    if numeric.is_empty() || components.len() > 3 || components.iter().any(|c| c.is_empty()) {
        return Err(anyhow!("invalid module version: {raw}"));
    }

    let mut parts = [0_u64; 3];
    for (slot, component) in parts.iter_mut().zip(&components) {
        *slot = component
            .parse()
            .with_context(|| format!("invalid version component '{component}' in {raw}"))?;
    }

    let mut normalized = format!("{}.{}.{}", parts[0], parts[1], parts[2]);
    let suffix = suffix.trim_start_matches(['-', '.']);
    if let Some(build) = suffix.strip_prefix('+') {
        normalized.push('+');
        normalized.push_str(build);
    } else if !suffix.is_empty() {
        normalized.push('-');
        normalized.push_str(suffix);
    }

    Version::parse(&normalized).with_context(|| format!("invalid module version: {raw}"))
}

/// Inclusive version bounds of a dependency; `None` means unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRange {
    pub min: Option<Version>,
    pub max: Option<Version>,
}

impl VersionRange {
    pub fn any() -> Self {
        Self::default()
    }

    /// Builds a range from manifest bounds. Empty strings and `*` are unbounded.
    pub fn parse(min: Option<&str>, max: Option<&str>) -> Result<Self> {
        let min = parse_bound(min).context("invalid minimum version")?;
        let max = parse_bound(max).context("invalid maximum version")?;
        if let (Some(min), Some(max)) = (&min, &max) {
            if min > max {
                return Err(anyhow!("minimum version {min} is above maximum {max}"));
            }
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, version: &Version) -> bool {
        self.min.as_ref().map(|min| version >= min).unwrap_or(true)
            && self.max.as_ref().map(|max| version <= max).unwrap_or(true)
    }

    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min = self
            .min
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "*".to_string());
        let max = self
            .max
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "*".to_string());
        write!(f, "[{min}, {max}]")
    }
}

fn parse_bound(raw: Option<&str>) -> Result<Option<Version>> {
    match raw.map(str::trim) {
        None | Some("") | Some("*") => Ok(None),
        Some(value) => parse_module_version(value).map(Some),
    }
}

pub(crate) mod serde_version {
    use semver::Version;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(version: &Version, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(version)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Version, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_module_version(&raw).map_err(|err| D::Error::custom(format!("{err:#}")))
    }
}
