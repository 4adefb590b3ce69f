//! OriginTag: identifies which write produced a stored snapshot.
//!
//! Each write attempt gets a fresh tag made of a per-session monotonically
//! increasing sequence number plus a random suffix, so two sessions that
//! happen to be at the same sequence number never collide.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OriginTagError {
    #[error("Invalid origin tag format: expected <seq>-<8 hex chars>")]
    InvalidFormat,
    #[error("Invalid number: {0}")]
    InvalidNumber(#[from] std::num::ParseIntError),
}

/// Opaque marker persisted alongside a write.
///
/// # Examples
/// ```
/// use ledger_core::OriginTag;
///
/// let tag: OriginTag = "42-0badf00d".parse().unwrap();
/// assert_eq!(tag.seq(), 42);
/// assert_eq!(tag.to_string(), "42-0badf00d");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OriginTag {
    seq: u64,
    nonce: u32,
}

impl OriginTag {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Display for OriginTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:08x}", self.seq, self.nonce)
    }
}

impl FromStr for OriginTag {
    type Err = OriginTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (seq, nonce) = s.split_once('-').ok_or(OriginTagError::InvalidFormat)?;
        if seq.is_empty() || nonce.len() != 8 || !nonce.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(OriginTagError::InvalidFormat);
        }
        Ok(Self {
            seq: seq.parse()?,
            nonce: u32::from_str_radix(nonce, 16)?,
        })
    }
}

impl serde::Serialize for OriginTag {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for OriginTag {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-session tag generator.
#[derive(Debug, Default)]
pub struct OriginTagSource {
    next_seq: u64,
}

impl OriginTagSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a tag that is unique for this write attempt.
    pub fn next_tag(&mut self) -> OriginTag {
        use rand::Rng;
        self.next_seq += 1;
        OriginTag {
            seq: self.next_seq,
            nonce: rand::rng().random(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let mut source = OriginTagSource::new();
        let a = source.next_tag();
        let b = source.next_tag();
        let c = source.next_tag();
        assert!(a.seq() < b.seq() && b.seq() < c.seq());
        assert_ne!(a, b);
    }

    #[test]
    fn test_sources_in_different_sessions_do_not_collide() {
        let mut one = OriginTagSource::new();
        let mut two = OriginTagSource::new();
        // Same sequence numbers; the random suffix tells them apart.
        // (1 in 2^32 chance of a false failure, per attempt.)
        let tags_one: Vec<_> = (0..8).map(|_| one.next_tag()).collect();
        let tags_two: Vec<_> = (0..8).map(|_| two.next_tag()).collect();
        let collisions = tags_one.iter().zip(&tags_two).filter(|(a, b)| a == b).count();
        assert_eq!(collisions, 0);
    }

    #[test]
    fn test_display_and_parse() {
        let tag = OriginTagSource::new().next_tag();
        let parsed: OriginTag = tag.to_string().parse().unwrap();
        assert_eq!(parsed, tag);
    }

    #[test]
    fn test_display_zero_padded_nonce() {
        let tag = OriginTag { seq: 7, nonce: 0xff };
        assert_eq!(tag.to_string(), "7-000000ff");
    }

    #[test]
    fn test_invalid_format() {
        assert!("".parse::<OriginTag>().is_err());
        assert!("7".parse::<OriginTag>().is_err());
        assert!("7-ff".parse::<OriginTag>().is_err());
        assert!("x-000000ff".parse::<OriginTag>().is_err());
        assert!("7-0000zzff".parse::<OriginTag>().is_err());
        assert!("-000000ff".parse::<OriginTag>().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let tag = OriginTagSource::new().next_tag();
        let json = serde_json::to_string(&tag).unwrap();
        let parsed: OriginTag = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tag);
    }
}
