//! Actor addresses
//!
//! An [`Address`] is an immutable, ordered sequence of path segments such as
//! `["worker", "7", "router"]`. Actor identity, routing and access rules are
//! all expressed over addresses. The first segment names the address space
//! (the worker or gateway prefix) that owns everything below it.
//!
//! The textual form joins segments with `:` (`worker:7:router`). A `:` or `\`
//! inside a segment is escaped with a backslash. Serde uses the same
//! textual form.

use crate::error::AddressError;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

const SEPARATOR: char = ':';
const ESCAPE: char = '\\';

/// Ordered, immutable sequence of non-empty segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    segments: Vec<String>,
}

impl Address {
    /// The empty address, a prefix of every address.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an address from segments. Every segment must be non-empty.
    pub fn new<I, S>(segments: I) -> Result<Self, AddressError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(AddressError::EmptySegment);
        }
        Ok(Self { segments })
    }

    /// Parse a `/`-delimited path such as `/worker/7/router`. Leading and
    /// trailing slashes are ignored.
    pub fn from_path(path: &str) -> Result<Self, AddressError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        Self::new(trimmed.split('/')).map_err(|_| AddressError::Malformed {
            text: path.to_string(),
            reason: "empty path segment".to_string(),
        })
    }

    pub fn size(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segment at `index`, if any.
    pub fn element(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn first(&self) -> Option<&str> {
        self.element(0)
    }

    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when every segment of `self` leads `other`. An address is a
    /// prefix of itself.
    pub fn is_prefix_of(&self, other: &Address) -> bool {
        other.segments.starts_with(&self.segments)
    }

    /// Strip `prefix` from the front of this address.
    pub fn remove_prefix(&self, prefix: &Address) -> Result<Address, AddressError> {
        if !prefix.is_prefix_of(self) {
            return Err(AddressError::NotAPrefix {
                prefix: prefix.to_string(),
                address: self.to_string(),
            });
        }
        Ok(Self {
            segments: self.segments[prefix.size()..].to_vec(),
        })
    }

    /// Drop the last `count` segments.
    pub fn remove_suffix(&self, count: usize) -> Result<Address, AddressError> {
        if count > self.size() {
            return Err(AddressError::SuffixTooLong {
                count,
                size: self.size(),
            });
        }
        Ok(Self {
            segments: self.segments[..self.size() - count].to_vec(),
        })
    }

    /// A new address with `segments` appended.
    pub fn append_suffix<I, S>(&self, segments: I) -> Result<Address, AddressError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let suffix = Address::new(segments)?;
        Ok(self.append(&suffix))
    }

    pub fn append(&self, suffix: &Address) -> Address {
        let mut segments = self.segments.clone();
        segments.extend(suffix.segments.iter().cloned());
        Self { segments }
    }

    /// Address of the child `id` directly below this one.
    pub fn child(&self, id: &str) -> Result<Address, AddressError> {
        self.append_suffix([id])
    }

    pub fn parent(&self) -> Option<Address> {
        self.remove_suffix(1).ok()
    }

    /// The segment that follows `prefix` in this address: the id of the next
    /// hop when descending from `prefix` towards `self`.
    pub fn next_after(&self, prefix: &Address) -> Option<&str> {
        if prefix.is_prefix_of(self) {
            self.element(prefix.size())
        } else {
            None
        }
    }

    /// Every prefix from the full address down to the empty address.
    pub fn prefixes(&self) -> impl Iterator<Item = &[String]> {
        (0..=self.size()).rev().map(move |len| &self.segments[..len])
    }
}

impl Borrow<[String]> for Address {
    fn borrow(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            for c in segment.chars() {
                if c == SEPARATOR || c == ESCAPE {
                    write!(f, "{}", ESCAPE)?;
                }
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Ok(Self::empty());
        }

        let malformed = |reason: &str| AddressError::Malformed {
            text: text.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = text.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err(malformed("dangling escape")),
                },
                SEPARATOR => {
                    if current.is_empty() {
                        return Err(malformed("empty segment"));
                    }
                    segments.push(std::mem::take(&mut current));
                }
                other => current.push(other),
            }
        }
        if current.is_empty() {
            return Err(malformed("empty segment"));
        }
        segments.push(current);

        Ok(Self { segments })
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}
