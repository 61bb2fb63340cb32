// src/version/mod.rs

//! Package identity and RPM-style version comparison
//!
//! Packages are identified by their NEVRA (`name-[epoch:]version-release.arch`).
//! Versions compare with the rpm segment algorithm: runs of digits compare
//! numerically, runs of letters lexically, `~` sorts before everything
//! (pre-releases) and `^` sorts after the base version (post-release snapshots).

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Epoch, version and release of a package
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Evr {
    pub epoch: u32,
    pub version: String,
    pub release: String,
}

impl Evr {
    /// Parse `[epoch:]version-release`
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch, rest) = match s.split_once(':') {
            Some((e, r)) => {
                let epoch = if e.is_empty() {
                    0
                } else {
                    e.parse::<u32>()
                        .map_err(|err| Error::ParseError(format!("Invalid epoch in '{s}': {err}")))?
                };
                (epoch, r)
            }
            None => (0, s),
        };

        let (version, release) = rest
            .rsplit_once('-')
            .ok_or_else(|| Error::ParseError(format!("Missing release in '{s}'")))?;

        if version.is_empty() || release.is_empty() {
            return Err(Error::ParseError(format!("Empty version component in '{s}'")));
        }

        Ok(Self {
            epoch,
            version: version.to_string(),
            release: release.to_string(),
        })
    }
}

impl fmt::Display for Evr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}", self.version, self.release)
    }
}

impl Ord for Evr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| rpmvercmp(&self.release, &other.release))
    }
}

impl PartialOrd for Evr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Full package identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nevra {
    pub name: String,
    pub epoch: u32,
    pub version: String,
    pub release: String,
    pub arch: String,
}

impl Nevra {
    pub fn new(name: &str, evr: &str, arch: &str) -> Result<Self> {
        let evr = Evr::parse(evr)?;
        Ok(Self {
            name: name.to_string(),
            epoch: evr.epoch,
            version: evr.version,
            release: evr.release,
            arch: arch.to_string(),
        })
    }

    /// Parse `name-[epoch:]version-release.arch`
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || Error::ParseError(format!("Cannot parse NEVRA \"{s}\""));

        let (nevr, arch) = s.rsplit_once('.').ok_or_else(invalid)?;
        let (nev, release) = nevr.rsplit_once('-').ok_or_else(invalid)?;
        let (ne, version) = nev.rsplit_once('-').ok_or_else(invalid)?;
        if arch.is_empty() || release.is_empty() || version.is_empty() {
            return Err(invalid());
        }

        // The epoch may be written either before the version or before the name.
        let (name, epoch, version) = match version.split_once(':') {
            Some((e, v)) => (ne, e, v),
            None => match ne.split_once(':') {
                Some((e, n)) => (n, e, version),
                None => (ne, "0", version),
            },
        };
        if name.is_empty() || version.is_empty() {
            return Err(invalid());
        }
        let epoch = if epoch.is_empty() {
            0
        } else {
            epoch.parse::<u32>().map_err(|_| invalid())?
        };

        Ok(Self {
            name: name.to_string(),
            epoch,
            version: version.to_string(),
            release: release.to_string(),
            arch: arch.to_string(),
        })
    }

    pub fn evr(&self) -> Evr {
        Evr {
            epoch: self.epoch,
            version: self.version.clone(),
            release: self.release.clone(),
        }
    }

    /// `name.arch`, the key under which only one non-installonly version may be installed
    pub fn na(&self) -> String {
        format!("{}.{}", self.name, self.arch)
    }

    /// NEVRA with the epoch always present, used in diagnostics
    pub fn to_full_string(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name, self.epoch, self.version, self.release, self.arch
        )
    }

    /// Compare only the EVR part
    pub fn evr_cmp(&self, other: &Nevra) -> Ordering {
        self.evr().cmp(&other.evr())
    }
}

impl fmt::Display for Nevra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-", self.name)?;
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}-{}.{}", self.version, self.release, self.arch)
    }
}

impl FromStr for Nevra {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Nevra::parse(s)
    }
}

impl Ord for Nevra {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.evr_cmp(other))
            .then_with(|| self.arch.cmp(&other.arch))
    }
}

impl PartialOrd for Nevra {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version (or release) strings the way rpm does
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let at = |s: &[u8], i: usize| s.get(i).copied().unwrap_or(0);
    let (mut i, mut j) = (0usize, 0usize);

    while i < one.len() || j < two.len() {
        while i < one.len() && !one[i].is_ascii_alphanumeric() && one[i] != b'~' && one[i] != b'^' {
            i += 1;
        }
        while j < two.len() && !two[j].is_ascii_alphanumeric() && two[j] != b'~' && two[j] != b'^' {
            j += 1;
        }

        // Tilde sorts before everything, even the end of the string
        if at(one, i) == b'~' || at(two, j) == b'~' {
            if at(one, i) != b'~' {
                return Ordering::Greater;
            }
            if at(two, j) != b'~' {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        // Caret sorts after the end of the string but before anything else
        if at(one, i) == b'^' || at(two, j) == b'^' {
            if i >= one.len() {
                return Ordering::Less;
            }
            if j >= two.len() {
                return Ordering::Greater;
            }
            if one[i] != b'^' {
                return Ordering::Greater;
            }
            if two[j] != b'^' {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if i >= one.len() || j >= two.len() {
            break;
        }

        let numeric = one[i].is_ascii_digit();
        let segment = |s: &[u8], mut k: usize| {
            let start = k;
            while k < s.len()
                && if numeric {
                    s[k].is_ascii_digit()
                } else {
                    s[k].is_ascii_alphabetic()
                }
            {
                k += 1;
            }
            (start, k)
        };
        let (s1, e1) = segment(one, i);
        let (s2, e2) = segment(two, j);
        i = e1;
        j = e2;

        if s2 == e2 {
            // Segments of different types: numeric is newer
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut seg1 = &one[s1..e1];
        let mut seg2 = &two[s2..e2];
        if numeric {
            while seg1.len() > 1 && seg1[0] == b'0' {
                seg1 = &seg1[1..];
            }
            while seg2.len() > 1 && seg2[0] == b'0' {
                seg2 = &seg2[1..];
            }
            match seg1.len().cmp(&seg2.len()) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        match seg1.cmp(seg2) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }

    match (i >= one.len(), j >= two.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}
