/// Search engine version parsing and capability predicates
///
/// The configured version string decides which wire dialect is spoken:
/// Elasticsearch 6 uses typed endpoints (`/{index}/{type}/{id}`), later
/// engines are type-less. Majors below 6 are taken to be OpenSearch.
use std::fmt;
use thiserror::Error;

/// Version parse failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("@version[{0}] is invalid - fail to parse")]
pub struct VersionParseError(pub String);

/// Engine lineage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Elasticsearch
    Es,
    /// OpenSearch
    Os,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Es => "es",
            Engine::Os => "os",
        }
    }
}

/// Parsed engine version, immutable once derived from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedVersion {
    pub engine: Engine,
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl ParsedVersion {
    /// Parse a SemVer-like string: `MAJOR(.MINOR(.PATCH)?)?(-PRERELEASE)?(+BUILD)?`
    ///
    /// Missing minor/patch default to 0.
    pub fn parse(version: &str) -> Result<Self, VersionParseError> {
        let fail = || VersionParseError(version.to_string());

        let (rest, build) = match version.split_once('+') {
            Some((head, build)) => (head, Some(Self::parse_label(build).ok_or_else(fail)?)),
            None => (version, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((head, pre)) => (head, Some(Self::parse_label(pre).ok_or_else(fail)?)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(fail());
        }
        let mut numbers = [0u32; 3];
        for (slot, part) in numbers.iter_mut().zip(parts.iter()) {
            *slot = Self::parse_number(part).ok_or_else(fail)?;
        }
        let [major, minor, patch] = numbers;

        Ok(Self {
            engine: if major < 6 { Engine::Os } else { Engine::Es },
            major,
            minor,
            patch,
            prerelease,
            build,
        })
    }

    fn parse_number(part: &str) -> Option<u32> {
        if part.is_empty() || part.len() > 4 || !part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        part.parse().ok()
    }

    fn parse_label(label: &str) -> Option<String> {
        let valid = !label.is_empty()
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        valid.then(|| label.to_string())
    }

    /// Elasticsearch 6.x (typed endpoints, numeric `hits.total`)
    pub fn is_old_es6(&self) -> bool {
        self.engine == Engine::Es && self.major < 7
    }

    /// Elasticsearch 7.1
    pub fn is_old_es71(&self) -> bool {
        self.engine == Engine::Es && self.major == 7 && self.minor == 1
    }

    /// OpenSearch 2.x or later
    pub fn is_latest_os2(&self) -> bool {
        self.engine == Engine::Os && self.major >= 2
    }

    /// Whether requests carry the document type path segment
    pub fn uses_doc_type(&self) -> bool {
        self.is_old_es6()
    }
}

impl fmt::Display for ParsedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}.{}", self.engine.as_str(), self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

/// Shorthand for [`ParsedVersion::parse`]
pub fn parse_version(version: &str) -> Result<ParsedVersion, VersionParseError> {
    ParsedVersion::parse(version)
}
