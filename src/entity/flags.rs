//! Typed opt-in expansion flags, parsed from a comma-separated request parameter.

use std::collections::BTreeSet;

/// A named sub-resource an entity can attach on request.
pub trait Flag: Copy + Ord + Send + Sync + 'static {
    fn parse(name: &str) -> Option<Self>;
}

/// Flag type for entities without expansions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoFlag {}

impl Flag for NoFlag {
    fn parse(_: &str) -> Option<Self> {
        None
    }
}

/// Set of requested flags, restricted to the entity's declared flag type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Flags<F: Flag>(BTreeSet<F>);

impl<F: Flag> Default for Flags<F> {
    fn default() -> Self {
        Flags(BTreeSet::new())
    }
}

impl<F: Flag> Flags<F> {
    pub fn none() -> Self {
        Flags::default()
    }

    pub fn of(flags: &[F]) -> Self {
        Flags(flags.iter().copied().collect())
    }

    /// Parse `"items,fees"`. Names the entity does not declare are ignored.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Flags::none();
        };
        Flags(
            raw.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .filter_map(F::parse)
                .collect(),
        )
    }

    pub fn contains(&self, flag: F) -> bool {
        self.0.contains(&flag)
    }

    pub fn iter(&self) -> impl Iterator<Item = F> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
    enum Demo {
        Items,
        Fees,
    }

    impl Flag for Demo {
        fn parse(name: &str) -> Option<Self> {
            match name {
                "items" => Some(Demo::Items),
                "fees" => Some(Demo::Fees),
                _ => None,
            }
        }
    }

    #[test]
    fn parses_known_and_ignores_unknown() {
        let flags: Flags<Demo> = Flags::parse(Some("items, bogus,,fees"));
        assert!(flags.contains(Demo::Items));
        assert!(flags.contains(Demo::Fees));
        assert_eq!(flags.iter().count(), 2);
    }

    #[test]
    fn absent_parameter_is_empty() {
        assert!(Flags::<Demo>::parse(None).is_empty());
        assert!(Flags::<NoFlag>::parse(Some("items")).is_empty());
    }
}
