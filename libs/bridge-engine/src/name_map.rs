use std::collections::HashMap;

use crate::error::ConfigError;

/// Имена, которые в запросе означают "все каналы".
pub const WILDCARDS: [&str; 2] = ["*", "..."];

pub fn is_wildcard(name: &str) -> bool {
    WILDCARDS.contains(&name)
}

// ═══════════════════════════════════════════════════════════════
//  NameMap
// ═══════════════════════════════════════════════════════════════

/// Неизменяемая биекция real ↔ virtual.
///
/// Пары хранятся в одном векторе в порядке конфигурации; оба индекса
/// указывают в него, поэтому направления не могут разойтись.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    pairs: Vec<(String, String)>,
    by_real: HashMap<String, usize>,
    by_virtual: HashMap<String, usize>,
}

impl NameMap {
    /// Построить из упорядоченных пар `(real, virtual)`.
    pub fn from_pairs<I, R, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (R, V)>,
        R: Into<String>,
        V: Into<String>,
    {
        let mut map = NameMap::default();
        for (i, (real, virt)) in pairs.into_iter().enumerate() {
            let (real, virt) = (real.into(), virt.into());
            if real.is_empty() || virt.is_empty() {
                return Err(ConfigError::EmptyName(i));
            }
            for name in [&real, &virt] {
                if is_wildcard(name) {
                    return Err(ConfigError::ReservedName(name.clone()));
                }
            }
            if map.by_real.contains_key(&real) {
                return Err(ConfigError::DuplicateReal(real));
            }
            if map.by_virtual.contains_key(&virt) {
                return Err(ConfigError::DuplicateVirtual(virt));
            }
            map.by_real.insert(real.clone(), i);
            map.by_virtual.insert(virt.clone(), i);
            map.pairs.push((real, virt));
        }
        Ok(map)
    }

    /// Построить из плоского списка `real virtual real virtual ...`
    /// (формат командной строки).
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, ConfigError> {
        let chunks = args.chunks_exact(2);
        if let [last] = chunks.remainder() {
            return Err(ConfigError::UnmatchedPair(last.as_ref().to_string()));
        }
        Self::from_pairs(chunks.map(|pair| (pair[0].as_ref(), pair[1].as_ref())))
    }

    pub fn virtual_name_for(&self, real: &str) -> Option<&str> {
        self.by_real.get(real).map(|&i| self.pairs[i].1.as_str())
    }

    pub fn real_name_for(&self, virt: &str) -> Option<&str> {
        self.by_virtual.get(virt).map(|&i| self.pairs[i].0.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Пары `(real, virtual)` в порядке конфигурации.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(r, v)| (r.as_str(), v.as_str()))
    }

    pub fn real_names(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(r, _)| r.as_str())
    }

    pub fn virtual_names(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NameMap {
        NameMap::from_pairs([("rawTempC", "temp"), ("rawPress", "pressure"), ("rawHum", "humidity")]).unwrap()
    }

    #[test]
    fn lookups_round_trip_in_both_directions() {
        let map = sample();
        for (real, virt) in map.iter() {
            assert_eq!(map.real_name_for(map.virtual_name_for(real).unwrap()), Some(real));
            assert_eq!(map.virtual_name_for(map.real_name_for(virt).unwrap()), Some(virt));
        }
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn namespaces_do_not_leak() {
        let map = sample();
        assert_eq!(map.real_name_for("rawTempC"), None);
        assert_eq!(map.virtual_name_for("temp"), None);
        assert_eq!(map.real_name_for("missing"), None);
    }

    #[test]
    fn duplicate_real_name_is_rejected() {
        let err = NameMap::from_pairs([("a", "x"), ("a", "y")]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateReal("a".into()));
    }

    #[test]
    fn duplicate_virtual_name_is_rejected() {
        let err = NameMap::from_pairs([("a", "x"), ("b", "x")]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateVirtual("x".into()));
    }

    #[test]
    fn empty_and_reserved_names_are_rejected() {
        assert_eq!(NameMap::from_pairs([("a", "x"), ("", "y")]).unwrap_err(), ConfigError::EmptyName(1));
        assert_eq!(
            NameMap::from_pairs([("a", "...")]).unwrap_err(),
            ConfigError::ReservedName("...".into())
        );
    }

    #[test]
    fn from_args_pairs_up_names() {
        let map = NameMap::from_args(&["rawTempC", "temp", "rawHum", "humidity"]).unwrap();
        assert_eq!(map.virtual_name_for("rawHum"), Some("humidity"));
        assert_eq!(map.virtual_names().collect::<Vec<_>>(), vec!["temp", "humidity"]);
    }

    #[test]
    fn from_args_rejects_odd_count() {
        let err = NameMap::from_args(&["rawTempC", "temp", "rawHum"]).unwrap_err();
        assert_eq!(err, ConfigError::UnmatchedPair("rawHum".into()));
    }

    #[test]
    fn same_name_on_both_sides_is_allowed() {
        // Совпадение имён между namespace'ами не нарушает биекцию.
        let map = NameMap::from_pairs([("a", "b"), ("b", "a")]).unwrap();
        assert_eq!(map.virtual_name_for("a"), Some("b"));
        assert_eq!(map.real_name_for("a"), Some("b"));
    }
}
