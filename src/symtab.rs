// Treadle, an actor runtime on a treadmill heap.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Treadle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/symtab.rs

// A table to associate atom names with compact internal IDs.

// <>

use std::collections::HashMap;

/// Interns atom names; IDs are issued in order starting from zero
#[derive(Default)]
pub struct SymbolTable {
    id_to_nm: Vec<Box<str>>,
    nm_to_id: HashMap<Box<str>, u32>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ID of a name, interning it if unseen
    pub fn get_id(&mut self, name: &str) -> u32 {
        if let Some(id) = self.lookup_by_name(name) {
            return id;
        }

        let id = u32::try_from(self.id_to_nm.len()).unwrap_or_else(|_| panic!("atom table full"));
        self.id_to_nm.push(name.into());
        self.nm_to_id.insert(name.into(), id);
        id
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<u32> {
        self.nm_to_id.get(name).copied()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.id_to_nm.get(id as usize).map(|s| &**s)
    }

    pub fn len(&self) -> usize {
        self.id_to_nm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_nm.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_test() {
        let mut tab = SymbolTable::new();

        let id = tab.get_id("testsym");

        assert!(tab.name(42).is_none());
        assert!(tab.lookup_by_name("nothere").is_none());

        assert_eq!(tab.name(id).unwrap(), "testsym");
        assert_eq!(tab.lookup_by_name("testsym").unwrap(), id);
        assert_eq!(tab.get_id("testsym"), id);
    }

    #[test]
    fn manysym() {
        let mut tab = SymbolTable::new();

        // generates symbols a00 - z99
        for i in 0..2600u32 {
            let name = format!("{}{:02}", (b'a' + (i / 100) as u8) as char, i % 100);
            assert_eq!(tab.get_id(&name), i);
        }

        assert_eq!("m13", tab.name(1213).unwrap());
        assert_eq!(692, tab.lookup_by_name("g92").unwrap());
        assert_eq!(tab.len(), 2600);
    }
}
