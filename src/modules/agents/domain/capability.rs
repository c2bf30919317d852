/// Capability flags an agent declares at registration
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// One thing an agent can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Metadata,
    Chapters,
    Pages,
    Search,
    Recommendations,
    Scrobble,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Metadata,
        Capability::Chapters,
        Capability::Pages,
        Capability::Search,
        Capability::Recommendations,
        Capability::Scrobble,
    ];

    const fn bit(self) -> u8 {
        match self {
            Capability::Metadata => 1 << 0,
            Capability::Chapters => 1 << 1,
            Capability::Pages => 1 << 2,
            Capability::Search => 1 << 3,
            Capability::Recommendations => 1 << 4,
            Capability::Scrobble => 1 << 5,
        }
    }

    /// Whether results for this capability come back in pages
    pub fn is_listing(self) -> bool {
        matches!(
            self,
            Capability::Search | Capability::Chapters | Capability::Recommendations
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Metadata => "metadata",
            Capability::Chapters => "chapters",
            Capability::Pages => "pages",
            Capability::Search => "search",
            Capability::Recommendations => "recommendations",
            Capability::Scrobble => "scrobble",
        };
        write!(f, "{}", name)
    }
}

/// Bitset of capabilities
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);

    pub const fn of(capability: Capability) -> Self {
        Capabilities(capability.bit())
    }

    pub fn all() -> Self {
        Capability::ALL.iter().copied().collect()
    }

    pub fn with(self, capability: Capability) -> Self {
        Capabilities(self.0 | capability.bit())
    }

    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL
            .into_iter()
            .filter(move |capability| self.contains(*capability))
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl From<Capability> for Capabilities {
    fn from(capability: Capability) -> Self {
        Capabilities::of(capability)
    }
}

impl BitOr<Capability> for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capability) -> Self::Output {
        self.with(rhs)
    }
}

impl BitOr for Capability {
    type Output = Capabilities;

    fn bitor(self, rhs: Capability) -> Self::Output {
        Capabilities::of(self).with(rhs)
    }
}

impl BitOrAssign<Capability> for Capabilities {
    fn bitor_assign(&mut self, rhs: Capability) {
        self.0 |= rhs.bit();
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Capabilities::NONE, Capabilities::with)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_operations() {
        let caps = Capability::Metadata | Capability::Search;
        assert!(caps.contains(Capability::Metadata));
        assert!(caps.contains(Capability::Search));
        assert!(!caps.contains(Capability::Scrobble));

        let mut more = caps;
        more |= Capability::Scrobble;
        assert!(more.contains(Capability::Scrobble));
        assert_eq!(more.iter().count(), 3);
    }

    #[test]
    fn test_all_and_none() {
        assert!(Capabilities::NONE.is_empty());
        let all = Capabilities::all();
        assert!(Capability::ALL.iter().all(|c| all.contains(*c)));
        assert_eq!(all.bits(), 0b11_1111);
    }

    #[test]
    fn test_serializes_as_names() {
        let caps = Capability::Chapters | Capability::Pages;
        assert_eq!(
            serde_json::to_value(caps).unwrap(),
            serde_json::json!(["chapters", "pages"])
        );
    }
}
