// Treadle, an actor runtime on a treadmill heap.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Treadle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/core.rs

// Core pair operations: structural equality, list utilities, and
// association-list maps, all built from heap cells.

// <>

use super::memmgt::Heap;
use super::symtab::SymbolTable;
use super::tag::{Ref, Val, NIL};

use std::fmt;

/// Longest list `Shown` prints before eliding the rest
const SHOW_LIMIT: usize = 64;

#[inline(always)]
pub fn make_pair(hp: &mut Heap, first: Ref, rest: Ref) -> Ref {
    hp.cons(first, rest)
}

#[inline(always)]
fn cons_p(r: Ref) -> bool {
    r.pair_p() && !r.nil_p()
}

/// Builds a proper list from a slice
pub fn list_from(hp: &mut Heap, items: &[Ref]) -> Ref {
    items.iter().rev().fold(NIL, |acc, &x| hp.cons(x, acc))
}

/// Structural equality on pairs, identity on everything else
///
/// Actors are never equal unless identical, however alike their
/// behavior and state.
pub fn equal(hp: &mut Heap, x: Ref, y: Ref) -> bool {
    let (mut x, mut y) = (x, y);
    loop {
        if x == y {
            return true;
        }
        if !(cons_p(x) && cons_p(y)) {
            return false;
        }

        let (xa, ya) = (hp.first(x), hp.first(y));
        if !equal(hp, xa, ya) {
            return false;
        }

        x = hp.rest(x);
        y = hp.rest(y);
    }
}

/// Copies `x` onto the front of `y`
pub fn append(hp: &mut Heap, x: Ref, y: Ref) -> Ref {
    assert!(x.pair_p(), "append onto non-list {x:?}");

    let mut items = vec![];
    let mut p = x;
    while !p.nil_p() {
        items.push(hp.first(p));
        p = hp.rest(p);
    }

    items.into_iter().rev().fold(y, |acc, a| hp.cons(a, acc))
}

pub fn reverse(hp: &mut Heap, list: Ref) -> Ref {
    let mut rev = NIL;
    let mut p = list;
    while !p.nil_p() {
        let a = hp.first(p);
        rev = hp.cons(a, rev);
        p = hp.rest(p);
    }
    rev
}

pub fn length(hp: &mut Heap, list: Ref) -> usize {
    let mut n = 0;
    let mut p = list;
    while !p.nil_p() {
        n += 1;
        p = hp.rest(p);
    }
    n
}

/// Rebuilds `form` with every key of `map` replaced by its value
///
/// Recurses only into `first`; the `rest` spine is walked in a loop.
pub fn replace(hp: &mut Heap, form: Ref, map: Ref) -> Ref {
    let mut heads = vec![];
    let mut p = form;
    let tail = loop {
        if p.nil_p() {
            break NIL;
        }

        let binding = map_find(hp, map, p);
        if !binding.nil_p() {
            break hp.rest(binding);
        }
        if !p.pair_p() {
            break p;
        }

        let a = hp.first(p);
        heads.push(replace(hp, a, map));
        p = hp.rest(p);
    };

    heads
        .into_iter()
        .rev()
        .fold(tail, |d, a| hp.cons(a, d))
}

// maps are lists of (key . value) bindings; keys compare by identity

/// The binding for `key`, or `NIL`
pub fn map_find(hp: &mut Heap, map: Ref, key: Ref) -> Ref {
    let mut p = map;
    while !p.nil_p() {
        let binding = hp.first(p);
        if hp.first(binding) == key {
            return binding;
        }
        p = hp.rest(p);
    }
    NIL
}

pub fn map_get_def(hp: &mut Heap, map: Ref, key: Ref, def: Ref) -> Ref {
    let binding = map_find(hp, map, key);
    if binding.nil_p() {
        def
    } else {
        hp.rest(binding)
    }
}

pub fn map_get(hp: &mut Heap, map: Ref, key: Ref) -> Option<Ref> {
    let binding = map_find(hp, map, key);
    (!binding.nil_p()).then(|| hp.rest(binding))
}

/// Shadows any earlier binding of `key`
pub fn map_put(hp: &mut Heap, map: Ref, key: Ref, val: Ref) -> Ref {
    assert!(map.pair_p(), "map_put on non-map {map:?}");
    let binding = hp.cons(key, val);
    hp.cons(binding, map)
}

/// Puts every binding of `other` onto `map`
pub fn map_put_all(hp: &mut Heap, map: Ref, other: Ref) -> Ref {
    let mut map = map;
    let mut p = other;
    while cons_p(p) {
        let binding = hp.first(p);
        if cons_p(binding) {
            let (k, v) = (hp.first(binding), hp.rest(binding));
            map = map_put(hp, map, k, v);
        }
        p = hp.rest(p);
    }
    map
}

/// Binds `keys` to `values` pairwise; stops at the shorter list
pub fn map_def(hp: &mut Heap, map: Ref, keys: Ref, values: Ref) -> Ref {
    let (mut map, mut keys, mut values) = (map, keys, values);
    while cons_p(keys) && cons_p(values) {
        let (k, v) = (hp.first(keys), hp.first(values));
        map = map_put(hp, map, k, v);
        keys = hp.rest(keys);
        values = hp.rest(values);
    }
    map
}

/// A new map without `key` and without any shadowed bindings
pub fn map_remove(hp: &mut Heap, map: Ref, key: Ref) -> Ref {
    let mut kept = NIL;
    let mut p = map;
    while !p.nil_p() {
        let binding = hp.first(p);
        let k = hp.first(binding);
        if k != key && map_find(hp, kept, k).nil_p() {
            kept = hp.cons(binding, kept);
        }
        p = hp.rest(p);
    }
    reverse(hp, kept)
}

/// Destructively unlinks the first binding of `key`; returns the map
pub fn map_cut(hp: &mut Heap, map: Ref, key: Ref) -> Ref {
    let mut prev = NIL;
    let mut p = map;
    while !p.nil_p() {
        let binding = hp.first(p);
        if hp.first(binding) == key {
            let next = hp.rest(p);
            if prev.nil_p() {
                return next;
            }
            hp.set_rest(prev, next);
            return map;
        }
        prev = p;
        p = hp.rest(p);
    }
    map
}

/// Printable view of a value
///
/// Reads cells directly, without the access barrier, so printing never
/// changes what the collector keeps.
pub struct Shown<'a> {
    hp: &'a Heap,
    tbl: &'a SymbolTable,
    val: Ref,
}

impl<'a> Shown<'a> {
    pub fn new(hp: &'a Heap, tbl: &'a SymbolTable, val: Ref) -> Self {
        Self { hp, tbl, val }
    }

    fn write_val(&self, f: &mut fmt::Formatter<'_>, r: Ref, depth: usize) -> fmt::Result {
        if depth > SHOW_LIMIT {
            return write!(f, "...");
        }

        match r.decode() {
            Val::Pair(0) => write!(f, "()"),
            Val::Pair(_) => {
                write!(f, "(")?;
                let mut p = r;
                let mut n = 0;
                loop {
                    let (a, d) = self.hp.peek(p);
                    self.write_val(f, a, depth + 1)?;
                    n += 1;
                    if d.nil_p() {
                        break;
                    }
                    if !d.pair_p() {
                        write!(f, " . ")?;
                        self.write_val(f, d, depth + 1)?;
                        break;
                    }
                    if n >= SHOW_LIMIT {
                        write!(f, " ...")?;
                        break;
                    }
                    write!(f, " ")?;
                    p = d;
                }
                write!(f, ")")
            }
            Val::Atom(id) => match self.tbl.name(id) {
                Some(name) => write!(f, "{name}"),
                None => write!(f, "#atom:{id}"),
            },
            Val::Func(i) => write!(f, "#fn:{i}"),
            Val::Actor(i) => write!(f, "#actor@{i}"),
            Val::Number(n) => write!(f, "{n}"),
            Val::Bool(true) => write!(f, "#t"),
            Val::Bool(false) => write!(f, "#f"),
            Val::Object(p) => write!(f, "#obj:{p}"),
        }
    }
}

impl fmt::Display for Shown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_val(f, self.val, 0)
    }
}
