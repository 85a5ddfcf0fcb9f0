//! Named register maps, one per supported product.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    /// The name is not present in the active map.
    #[error("unknown key {0}")]
    UnknownRegister(String),
    /// A map was built with the same name twice.
    #[error("register {0} is defined more than once")]
    DuplicateName(String),
    /// A map was built with two names sharing one address.
    #[error("registers {first} and {second} share address {address}")]
    DuplicateAddress {
        address: u16,
        first: String,
        second: String,
    },
}

/// Ordered, immutable mapping from register name to Modbus address.
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterMap {
    // Declaration order, kept for display.
    entries: Vec<(String, u16)>,
    by_name: HashMap<String, u16>,
    by_address: HashMap<u16, Vec<usize>>,
}

impl RegisterMap {
    /// Builds a map from `(name, address)` pairs in declaration order.
    ///
    /// Names are case-sensitive. Fails on a repeated name or a repeated
    /// address.
    pub fn new<I, S>(entries: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = (S, u16)>,
        S: Into<String>,
    {
        let mut map = Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            by_address: HashMap::new(),
        };

        for (name, address) in entries {
            let name = name.into();
            if map.by_name.contains_key(&name) {
                return Err(CatalogError::DuplicateName(name));
            }
            if let Some(existing) = map.by_address.get(&address) {
                let first = map.entries[existing[0]].0.clone();
                return Err(CatalogError::DuplicateAddress {
                    address,
                    first,
                    second: name,
                });
            }
            map.by_name.insert(name.clone(), address);
            map.by_address
                .entry(address)
                .or_default()
                .push(map.entries.len());
            map.entries.push((name, address));
        }

        Ok(map)
    }

    /// Looks up the address for `name`.
    pub fn resolve(&self, name: &str) -> Result<u16, CatalogError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::UnknownRegister(name.to_string()))
    }

    /// All names registered at `address`, in declaration order.
    pub fn names_at(&self, address: u16) -> Vec<&str> {
        self.by_address
            .get(&address)
            .map(|indices| indices.iter().map(|&i| self.entries[i].0.as_str()).collect())
            .unwrap_or_default()
    }

    /// Display name for `address`: names joined with `;`, or `None` when the
    /// address is not mapped.
    pub fn reverse(&self, address: u16) -> Option<String> {
        let names = self.names_at(address);
        if names.is_empty() {
            None
        } else {
            Some(names.join(";"))
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.entries.iter().map(|(name, address)| (name.as_str(), *address))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RegisterMap {
        RegisterMap::new([("BIT", 0), ("LOG_LEVEL", 5), ("BUS_VOLTAGE", 45)]).unwrap()
    }

    #[test]
    fn resolve_known_and_unknown() {
        let map = sample();
        assert_eq!(map.resolve("BUS_VOLTAGE"), Ok(45));
        assert_eq!(
            map.resolve("bus_voltage"),
            Err(CatalogError::UnknownRegister("bus_voltage".into()))
        );
    }

    #[test]
    fn reverse_round_trips_every_name() {
        let map = sample();
        for (name, address) in map.iter() {
            assert_eq!(map.reverse(map.resolve(name).unwrap()), Some(name.to_string()));
            assert_eq!(map.names_at(address), vec![name]);
        }
        assert_eq!(map.reverse(99), None);
    }

    #[test]
    fn keeps_declaration_order() {
        let map = sample();
        let names: Vec<_> = map.names().collect();
        assert_eq!(names, ["BIT", "LOG_LEVEL", "BUS_VOLTAGE"]);
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = RegisterMap::new([("BIT", 0), ("BIT", 1)]).unwrap_err();
        assert_eq!(err, CatalogError::DuplicateName("BIT".into()));
    }

    #[test]
    fn rejects_duplicate_addresses() {
        let err = RegisterMap::new([("BIT", 0), ("ALIAS", 0)]).unwrap_err();
        assert_eq!(
            err,
            CatalogError::DuplicateAddress {
                address: 0,
                first: "BIT".into(),
                second: "ALIAS".into(),
            }
        );
        assert_eq!(err.to_string(), "registers BIT and ALIAS share address 0");
    }

    #[test]
    fn unknown_register_message() {
        let err = CatalogError::UnknownRegister("NOPE".into());
        assert_eq!(err.to_string(), "unknown key NOPE");
    }
}
