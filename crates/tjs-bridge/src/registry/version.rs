//! Library version numbers

use std::cmp::Ordering;
use std::fmt;

/// Published library version (`major.minor[.patch][-prerelease][+build]`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Pre-release tag (e.g., "alpha.1")
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl LibraryVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Parse from string (e.g., "3.0.0-alpha.1+build5")
    pub fn parse(version: &str) -> Result<Self, String> {
        let version = version.trim();

        let (without_build, build) = match version.split_once('+') {
            Some((head, build)) => (head, Some(build.to_string())),
            None => (version, None),
        };
        let (core, prerelease) = match without_build.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (without_build, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(format!("Invalid version format: {}", version));
        }
        let number = |part: &str, what: &str| {
            part.parse::<u32>()
                .map_err(|_| format!("Invalid {} version: {}", what, part))
        };

        Ok(Self {
            major: number(parts[0], "major")?,
            minor: number(parts[1], "minor")?,
            patch: match parts.get(2) {
                Some(part) => number(part, "patch")?,
                None => 0,
            },
            prerelease,
            build,
        })
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    pub fn is_newer_than(&self, other: &LibraryVersion) -> bool {
        self > other
    }

    /// Whether this version satisfies a registry selector
    ///
    /// Selectors are `latest` / `*` (any), a major (`3`, `3.*`), a minor
    /// (`2.4`, `2.4.*`) or an exact version.
    pub fn matches(&self, selector: &str) -> bool {
        let selector = selector.trim();
        if selector == "latest" || selector == "*" {
            return true;
        }
        let prefix = selector.trim_end_matches(".*");
        let parts: Vec<&str> = prefix.split('.').collect();
        match parts.as_slice() {
            [major] => major.parse::<u32>() == Ok(self.major),
            [major, minor] => major.parse::<u32>() == Ok(self.major) && minor.parse::<u32>() == Ok(self.minor),
            _ => LibraryVersion::parse(selector).is_ok_and(|v| v == *self),
        }
    }
}

impl PartialOrd for LibraryVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A pre-release sorts before its release; build metadata only breaks ties
impl Ord for LibraryVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parsing() {
        let v = LibraryVersion::parse("2.4.2").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (2, 4, 2));

        let v = LibraryVersion::parse("3.0.0-alpha.1+b7").unwrap();
        assert_eq!(v.prerelease.as_deref(), Some("alpha.1"));
        assert_eq!(v.build.as_deref(), Some("b7"));
        assert_eq!(v.to_string(), "3.0.0-alpha.1+b7");

        assert_eq!(LibraryVersion::parse("2.5").unwrap().patch, 0);
        assert!(LibraryVersion::parse("2").is_err());
        assert!(LibraryVersion::parse("x.1.0").is_err());
    }

    #[test]
    fn test_precedence() {
        let release = LibraryVersion::new(3, 0, 0);
        let alpha = LibraryVersion::parse("3.0.0-alpha.2").unwrap();
        let old = LibraryVersion::new(2, 17, 2);

        assert!(release.is_newer_than(&alpha));
        assert!(alpha.is_newer_than(&old));
        assert!(!old.is_newer_than(&old));
    }

    #[test]
    fn test_selectors() {
        let v = LibraryVersion::new(3, 1, 2);
        assert!(v.matches("latest"));
        assert!(v.matches("3.*"));
        assert!(v.matches("3"));
        assert!(v.matches("3.1.*"));
        assert!(v.matches("3.1.2"));
        assert!(!v.matches("2.*"));
        assert!(!v.matches("3.1.3"));
    }
}
