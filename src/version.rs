use core::fmt;
use std::str::FromStr;

use nom::{
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map_res, opt},
    sequence::{delimited, preceded, tuple},
    IResult,
};

/// Semantic app version. Ordering is lexicographic over (major, minor, patch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn parse_component(i: &str) -> IResult<&str, u32> {
    map_res(digit1, |n: &str| n.parse::<u32>())(i)
}

/// `major[.minor[.patch]]`, missing components default to zero.
pub(crate) fn parse_version(i: &str) -> IResult<&str, Version> {
    let (i, (major, minor, patch)) = tuple((
        parse_component,
        opt(preceded(char('.'), parse_component)),
        opt(preceded(char('.'), parse_component)),
    ))(i)?;
    Ok((
        i,
        Version::new(major, minor.unwrap_or(0), patch.unwrap_or(0)),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version {0:?}, expected major.minor.patch")]
pub struct VersionParseError(pub String);

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        all_consuming(delimited(multispace0, parse_version, multispace0))(s)
            .map(|(_, v)| v)
            .map_err(|_| VersionParseError(s.to_string()))
    }
}

/// Range of app versions a rule applies to. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VersionRange {
    #[default]
    Unbounded,
    MinBound(Version),
    MaxBound(Version),
    Bounded {
        min: Version,
        max: Version,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("version range minimum {min} is greater than maximum {max}")]
pub struct InvertedRange {
    pub min: Version,
    pub max: Version,
}

impl VersionRange {
    pub fn at_least(min: Version) -> Self {
        VersionRange::MinBound(min)
    }

    pub fn at_most(max: Version) -> Self {
        VersionRange::MaxBound(max)
    }

    pub fn between(min: Version, max: Version) -> Result<Self, InvertedRange> {
        if min > max {
            return Err(InvertedRange { min, max });
        }
        Ok(VersionRange::Bounded { min, max })
    }

    pub fn is_bounded(&self) -> bool {
        !matches!(self, VersionRange::Unbounded)
    }

    pub fn contains(&self, version: Version) -> bool {
        match self {
            VersionRange::Unbounded => true,
            VersionRange::MinBound(min) => version >= *min,
            VersionRange::MaxBound(max) => version <= *max,
            VersionRange::Bounded { min, max } => version >= *min && version <= *max,
        }
    }

    pub fn min(&self) -> Option<Version> {
        match self {
            VersionRange::MinBound(min) | VersionRange::Bounded { min, .. } => Some(*min),
            _ => None,
        }
    }

    pub fn max(&self) -> Option<Version> {
        match self {
            VersionRange::MaxBound(max) | VersionRange::Bounded { max, .. } => Some(*max),
            _ => None,
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Unbounded => f.write_str("*"),
            VersionRange::MinBound(min) => write!(f, ">={min}"),
            VersionRange::MaxBound(max) => write!(f, "<={max}"),
            VersionRange::Bounded { min, max } => write!(f, "{min}..={max}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!("1.2.3".parse::<Version>().unwrap(), Version::new(1, 2, 3));
        assert_eq!(" 10.0 ".parse::<Version>().unwrap(), Version::new(10, 0, 0));
        assert_eq!("7".parse::<Version>().unwrap(), Version::new(7, 0, 0));
        assert!("1.2.x".parse::<Version>().is_err());
        assert!("-1.0.0".parse::<Version>().is_err());
        assert!("1.2.3.4".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(Version::new(1, 10, 0) > Version::new(1, 9, 99));
        assert!(Version::new(2, 0, 0) > Version::new(1, 99, 99));
        assert!(Version::new(1, 0, 1) > Version::new(1, 0, 0));
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let min = Version::new(2, 0, 0);
        let max = Version::new(3, 0, 0);

        assert!(VersionRange::at_least(min).contains(min));
        assert!(!VersionRange::at_least(min).contains(Version::new(1, 9, 9)));

        // max bound admits the max itself
        assert!(VersionRange::at_most(max).contains(max));
        assert!(!VersionRange::at_most(max).contains(Version::new(3, 0, 1)));

        let both = VersionRange::between(min, max).unwrap();
        assert!(both.contains(min));
        assert!(both.contains(max));
        assert!(both.contains(Version::new(2, 5, 0)));
        assert!(!both.contains(Version::new(3, 0, 1)));

        assert!(VersionRange::Unbounded.contains(Version::new(0, 0, 0)));
    }

    #[test]
    fn test_inverted_range() {
        let err = VersionRange::between(Version::new(3, 0, 0), Version::new(2, 0, 0)).unwrap_err();
        assert_eq!(err.min, Version::new(3, 0, 0));
        // single-version range is fine
        assert!(VersionRange::between(Version::new(1, 0, 0), Version::new(1, 0, 0)).is_ok());
    }
}
