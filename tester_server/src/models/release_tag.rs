//! Release tags: `vMAJOR.MINOR.PATCH` submission checkpoints.
//!
//! A [`ReleaseTag`] keeps the exact tag text (the ledger and duplicate check
//! compare by text) alongside the numeric components used for ordering.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v([0-9]+)\.([0-9]+)\.([0-9]+)$").expect("tag pattern is valid")
});

/// Human-readable form of the accepted grammar, used in rejection issues.
pub const TAG_GRAMMAR: &str = "vX.Y.Z (e.g. v1.0.0)";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagParseError {
    #[error("tag {0:?} does not match vX.Y.Z")]
    Malformed(String),
    #[error("tag {0:?} has a component too large to represent")]
    Overflow(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseTag {
    raw: String,
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ReleaseTag {
    pub fn parse(tag: &str) -> Result<Self, TagParseError> {
        let caps = TAG_PATTERN
            .captures(tag)
            .ok_or_else(|| TagParseError::Malformed(tag.to_string()))?;

        let component = |i: usize| -> Result<u64, TagParseError> {
            caps[i]
                .parse()
                .map_err(|_| TagParseError::Overflow(tag.to_string()))
        };

        Ok(Self {
            raw: tag.to_string(),
            major: component(1)?,
            minor: component(2)?,
            patch: component(3)?,
        })
    }

    /// The exact tag text as pushed.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Grading window key: the tag text without its `.PATCH` suffix (`v1.2.7` -> `v1.2`).
    pub fn version_name(&self) -> &str {
        match self.raw.rfind('.') {
            Some(idx) => &self.raw[..idx],
            None => &self.raw,
        }
    }

    /// Same MAJOR.MINOR pair, compared numerically.
    pub fn same_line(&self, other: &ReleaseTag) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl FromStr for ReleaseTag {
    type Err = TagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_tags() {
        let tag = ReleaseTag::parse("v1.2.7").unwrap();
        assert_eq!((tag.major, tag.minor, tag.patch), (1, 2, 7));
        assert_eq!(tag.as_str(), "v1.2.7");
        assert_eq!(tag.version_name(), "v1.2");

        let big = ReleaseTag::parse("v10.20.300").unwrap();
        assert_eq!(big.version_name(), "v10.20");
    }

    #[test]
    fn leading_zeros_parse_as_decimal_but_keep_text() {
        let tag = ReleaseTag::parse("v01.02.003").unwrap();
        assert_eq!((tag.major, tag.minor, tag.patch), (1, 2, 3));
        assert_eq!(tag.version_name(), "v01.02");
    }

    #[test]
    fn rejects_anything_outside_the_grammar() {
        for bad in [
            "", "1.0.0", "v1.0", "release-1", "not-a-version", "v1.0.0-rc1", "xv1.0.0",
            "v1.0.0 ", "V1.0.0", "v1..0", "v1.0.0.0", "v١.0.0", "refs/tags/v1.0.0",
        ] {
            assert!(
                matches!(ReleaseTag::parse(bad), Err(TagParseError::Malformed(_))),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn oversized_component_is_rejected() {
        let err = ReleaseTag::parse("v1.99999999999999999999999.0").unwrap_err();
        assert!(matches!(err, TagParseError::Overflow(_)));
    }

    #[test]
    fn same_line_compares_numerically() {
        let a = ReleaseTag::parse("v1.2.0").unwrap();
        let b = ReleaseTag::parse("v01.2.9").unwrap();
        let c = ReleaseTag::parse("v1.3.0").unwrap();
        assert!(a.same_line(&b));
        assert!(!a.same_line(&c));
    }
}
