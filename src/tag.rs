// Treadle, an actor runtime on a treadmill heap.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Treadle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/tag.rs

// Tagged references. Every runtime value fits in one word; a few
// discriminant bits say how to read the rest of it. The bit layout is
// picked at build time by cargo feature.

// <>

use std::fmt;

#[cfg(all(feature = "tag-3lsb", feature = "tag-1lsb-2msb"))]
compile_error!("select at most one reference tag layout");

/// Every kind of value a reference word may hold
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kind {
    Pair,
    Atom,
    Func,
    Actor,
    Number,
    Bool,
    Object,
}

/// Two low bits: `00` pair, `01` actor, `11` number, and `10` for
/// everything else, split further by bits 3..2
#[cfg(not(any(feature = "tag-3lsb", feature = "tag-1lsb-2msb")))]
mod layout {
    use super::Kind;

    pub const NAME: &str = "2lsb";

    const TAG_MASK: u64 = 0b11;
    const TAG_PAIR: u64 = 0b00;
    const TAG_ACTOR: u64 = 0b01;
    const TAG_OTHER: u64 = 0b10;
    const TAG_NUMBER: u64 = 0b11;

    const SUB_MASK: u64 = 0b1100;
    const SUB_ATOM: u64 = 0b0000;
    const SUB_FUNC: u64 = 0b0100;
    const SUB_OBJECT: u64 = 0b1000;
    const SUB_BOOL: u64 = 0b1100;

    pub const NUM_MIN: i64 = -(1 << 61);
    pub const NUM_MAX: i64 = (1 << 61) - 1;
    pub const INDEX_MAX: u64 = (1 << 62) - 1;
    pub const PAYLOAD_MAX: u64 = (1 << 60) - 1;

    pub const fn pack(kind: Kind, p: u64) -> u64 {
        match kind {
            Kind::Pair => p << 2 | TAG_PAIR,
            Kind::Actor => p << 2 | TAG_ACTOR,
            Kind::Atom => p << 4 | SUB_ATOM | TAG_OTHER,
            Kind::Func => p << 4 | SUB_FUNC | TAG_OTHER,
            Kind::Object => p << 4 | SUB_OBJECT | TAG_OTHER,
            Kind::Bool => p << 4 | SUB_BOOL | TAG_OTHER,
            Kind::Number => pack_num(p as i64),
        }
    }

    pub const fn pack_num(n: i64) -> u64 {
        (n as u64) << 2 | TAG_NUMBER
    }

    pub const fn unpack_num(w: u64) -> i64 {
        (w as i64) >> 2
    }

    pub fn kind(w: u64) -> Kind {
        match w & TAG_MASK {
            TAG_PAIR => Kind::Pair,
            TAG_ACTOR => Kind::Actor,
            TAG_NUMBER => Kind::Number,
            _ => match w & SUB_MASK {
                SUB_ATOM => Kind::Atom,
                SUB_FUNC => Kind::Func,
                SUB_OBJECT => Kind::Object,
                _ => Kind::Bool,
            },
        }
    }

    pub fn payload(w: u64) -> u64 {
        if w & TAG_MASK == TAG_OTHER {
            w >> 4
        } else {
            w >> 2
        }
    }
}

/// Three low bits, one code per kind; `111` is never produced
#[cfg(feature = "tag-3lsb")]
mod layout {
    use super::Kind;

    pub const NAME: &str = "3lsb";

    const TAG_MASK: u64 = 0b111;
    const TAG_PAIR: u64 = 0b000;
    const TAG_NUMBER: u64 = 0b001;
    const TAG_ATOM: u64 = 0b010;
    const TAG_FUNC: u64 = 0b011;
    const TAG_ACTOR: u64 = 0b100;
    const TAG_OBJECT: u64 = 0b101;
    const TAG_BOOL: u64 = 0b110;

    pub const NUM_MIN: i64 = -(1 << 60);
    pub const NUM_MAX: i64 = (1 << 60) - 1;
    pub const INDEX_MAX: u64 = (1 << 61) - 1;
    pub const PAYLOAD_MAX: u64 = (1 << 61) - 1;

    pub const fn pack(kind: Kind, p: u64) -> u64 {
        match kind {
            Kind::Pair => p << 3 | TAG_PAIR,
            Kind::Atom => p << 3 | TAG_ATOM,
            Kind::Func => p << 3 | TAG_FUNC,
            Kind::Actor => p << 3 | TAG_ACTOR,
            Kind::Object => p << 3 | TAG_OBJECT,
            Kind::Bool => p << 3 | TAG_BOOL,
            Kind::Number => pack_num(p as i64),
        }
    }

    pub const fn pack_num(n: i64) -> u64 {
        (n as u64) << 3 | TAG_NUMBER
    }

    pub const fn unpack_num(w: u64) -> i64 {
        (w as i64) >> 3
    }

    pub fn kind(w: u64) -> Kind {
        match w & TAG_MASK {
            TAG_PAIR => Kind::Pair,
            TAG_NUMBER => Kind::Number,
            TAG_ATOM => Kind::Atom,
            TAG_FUNC => Kind::Func,
            TAG_ACTOR => Kind::Actor,
            TAG_OBJECT => Kind::Object,
            TAG_BOOL => Kind::Bool,
            _ => panic!("invalid reference word {w:#x}"),
        }
    }

    pub fn payload(w: u64) -> u64 {
        w >> 3
    }
}

/// One low bit separates immediates from references; the two high
/// bits pick the kind within each class
#[cfg(all(feature = "tag-1lsb-2msb", not(feature = "tag-3lsb")))]
mod layout {
    use super::Kind;

    pub const NAME: &str = "1lsb-2msb";

    const IMMEDIATE: u64 = 1;
    const HIGH_SHIFT: u32 = 62;
    const FIELD_MASK: u64 = (1 << 61) - 1;

    // immediates
    const IMM_NUMBER: u64 = 0b00;
    const IMM_FUNC: u64 = 0b01;
    const IMM_BOOL: u64 = 0b10;

    // references
    const REF_PAIR: u64 = 0b00;
    const REF_ATOM: u64 = 0b01;
    const REF_OBJECT: u64 = 0b10;
    const REF_ACTOR: u64 = 0b11;

    pub const NUM_MIN: i64 = -(1 << 60);
    pub const NUM_MAX: i64 = (1 << 60) - 1;
    pub const INDEX_MAX: u64 = FIELD_MASK;
    pub const PAYLOAD_MAX: u64 = FIELD_MASK;

    pub const fn pack(kind: Kind, p: u64) -> u64 {
        let field = (p & FIELD_MASK) << 1;
        match kind {
            Kind::Pair => REF_PAIR << HIGH_SHIFT | field,
            Kind::Atom => REF_ATOM << HIGH_SHIFT | field,
            Kind::Object => REF_OBJECT << HIGH_SHIFT | field,
            Kind::Actor => REF_ACTOR << HIGH_SHIFT | field,
            Kind::Func => IMM_FUNC << HIGH_SHIFT | field | IMMEDIATE,
            Kind::Bool => IMM_BOOL << HIGH_SHIFT | field | IMMEDIATE,
            Kind::Number => pack_num(p as i64),
        }
    }

    pub const fn pack_num(n: i64) -> u64 {
        IMM_NUMBER << HIGH_SHIFT | ((n as u64) & FIELD_MASK) << 1 | IMMEDIATE
    }

    pub const fn unpack_num(w: u64) -> i64 {
        // sign extends from bit 60 of the field
        ((((w >> 1) & FIELD_MASK) << 3) as i64) >> 3
    }

    pub fn kind(w: u64) -> Kind {
        if w & IMMEDIATE == IMMEDIATE {
            match w >> HIGH_SHIFT {
                IMM_NUMBER => Kind::Number,
                IMM_FUNC => Kind::Func,
                IMM_BOOL => Kind::Bool,
                _ => panic!("invalid reference word {w:#x}"),
            }
        } else {
            match w >> HIGH_SHIFT {
                REF_PAIR => Kind::Pair,
                REF_ATOM => Kind::Atom,
                REF_OBJECT => Kind::Object,
                _ => Kind::Actor,
            }
        }
    }

    pub fn payload(w: u64) -> u64 {
        (w >> 1) & FIELD_MASK
    }
}

/// Name of the layout this build uses
pub const LAYOUT: &str = layout::NAME;
/// Smallest representable number
pub const NUM_MIN: i64 = layout::NUM_MIN;
/// Largest representable number
pub const NUM_MAX: i64 = layout::NUM_MAX;
/// Largest cell index a pair or actor reference can carry
pub const INDEX_MAX: u64 = layout::INDEX_MAX;
/// Largest atom, function, or object payload
pub const PAYLOAD_MAX: u64 = layout::PAYLOAD_MAX;

/// A tagged reference word
///
/// Equality is word identity: two numbers are equal when they hold the
/// same value, two pairs only when they name the same cell.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Ref(u64);

/// The empty list; cell 0 of every heap
pub const NIL: Ref = Ref(layout::pack(Kind::Pair, 0));
pub const FALSE: Ref = Ref(layout::pack(Kind::Bool, 0));
pub const TRUE: Ref = Ref(layout::pack(Kind::Bool, 1));

/// A decoded reference
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Val {
    Pair(usize),
    Atom(u32),
    Func(usize),
    Actor(usize),
    Number(i64),
    Bool(bool),
    Object(u64),
}

impl Ref {
    pub fn pair(idx: usize) -> Self {
        assert!(idx as u64 <= INDEX_MAX, "cell index {idx} out of range");
        Self(layout::pack(Kind::Pair, idx as u64))
    }

    pub fn actor(idx: usize) -> Self {
        assert!(idx as u64 <= INDEX_MAX, "cell index {idx} out of range");
        Self(layout::pack(Kind::Actor, idx as u64))
    }

    pub fn atom(id: u32) -> Self {
        Self(layout::pack(Kind::Atom, id as u64))
    }

    pub fn func(idx: usize) -> Self {
        assert!(idx as u64 <= PAYLOAD_MAX, "function index {idx} out of range");
        Self(layout::pack(Kind::Func, idx as u64))
    }

    pub fn object(p: u64) -> Self {
        assert!(p <= PAYLOAD_MAX, "object payload {p:#x} out of range");
        Self(layout::pack(Kind::Object, p))
    }

    /// Encodes a number; panics outside `NUM_MIN..=NUM_MAX`
    pub fn number(n: i64) -> Self {
        match Self::try_number(n) {
            Some(r) => r,
            None => panic!("number {n} does not fit the {LAYOUT} layout"),
        }
    }

    pub fn try_number(n: i64) -> Option<Self> {
        (NUM_MIN..=NUM_MAX)
            .contains(&n)
            .then(|| Self(layout::pack_num(n)))
    }

    pub fn boolean(b: bool) -> Self {
        if b {
            TRUE
        } else {
            FALSE
        }
    }

    /// The raw word
    pub const fn word(self) -> u64 {
        self.0
    }

    pub fn kind(self) -> Kind {
        layout::kind(self.0)
    }

    pub fn decode(self) -> Val {
        let p = layout::payload(self.0);
        match self.kind() {
            Kind::Pair => Val::Pair(p as usize),
            Kind::Atom => Val::Atom(p as u32),
            Kind::Func => Val::Func(p as usize),
            Kind::Actor => Val::Actor(p as usize),
            Kind::Number => Val::Number(layout::unpack_num(self.0)),
            Kind::Bool => Val::Bool(p != 0),
            Kind::Object => Val::Object(p),
        }
    }

    pub fn nil_p(self) -> bool {
        self == NIL
    }

    /// True for every pair, `NIL` included
    pub fn pair_p(self) -> bool {
        self.kind() == Kind::Pair
    }

    pub fn actor_p(self) -> bool {
        self.kind() == Kind::Actor
    }

    pub fn atom_p(self) -> bool {
        self.kind() == Kind::Atom
    }

    pub fn func_p(self) -> bool {
        self.kind() == Kind::Func
    }

    pub fn number_p(self) -> bool {
        self.kind() == Kind::Number
    }

    pub fn bool_p(self) -> bool {
        self.kind() == Kind::Bool
    }

    pub fn object_p(self) -> bool {
        self.kind() == Kind::Object
    }

    pub fn as_number(self) -> i64 {
        self.expect(Kind::Number);
        layout::unpack_num(self.0)
    }

    pub fn as_atom(self) -> u32 {
        self.expect(Kind::Atom);
        layout::payload(self.0) as u32
    }

    pub fn as_func(self) -> usize {
        self.expect(Kind::Func);
        layout::payload(self.0) as usize
    }

    pub fn as_bool(self) -> bool {
        self.expect(Kind::Bool);
        layout::payload(self.0) != 0
    }

    pub fn as_object(self) -> u64 {
        self.expect(Kind::Object);
        layout::payload(self.0)
    }

    /// Cell index behind a pair or an actor
    pub fn cell(self) -> usize {
        match self.kind() {
            Kind::Pair | Kind::Actor => layout::payload(self.0) as usize,
            k => panic!("{self:?} is a {k:?}, not a cell"),
        }
    }

    #[inline(always)]
    fn expect(self, kind: Kind) {
        let k = self.kind();
        if k != kind {
            panic!("{self:?} is a {k:?}, not a {kind:?}");
        }
    }
}

impl From<bool> for Ref {
    fn from(b: bool) -> Self {
        Self::boolean(b)
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nil_p() {
            return write!(f, "NIL");
        }
        write!(f, "{:?}", self.decode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_word() {
        assert_eq!(NIL.word(), 0);
        assert!(NIL.nil_p());
        assert!(NIL.pair_p());
        assert_eq!(NIL.cell(), 0);
        assert!(!Ref::pair(1).nil_p());
    }

    #[test]
    fn number_bounds() {
        for n in [0, 1, -1, 42, -42, NUM_MIN, NUM_MAX, NUM_MIN + 1, NUM_MAX - 1] {
            let r = Ref::number(n);
            assert!(r.number_p());
            assert_eq!(r.as_number(), n);
            assert_eq!(r.decode(), Val::Number(n));
        }

        assert!(Ref::try_number(NUM_MAX + 1).is_none());
        assert!(Ref::try_number(NUM_MIN - 1).is_none());
        assert!(Ref::try_number(i64::MAX).is_none());
        assert!(Ref::try_number(i64::MIN).is_none());
    }

    #[test]
    #[should_panic]
    fn number_overflow() {
        Ref::number(NUM_MAX + 1);
    }

    #[test]
    fn payload_round_trip() {
        let max_idx = INDEX_MAX as usize;
        for idx in [0, 1, 7, 4096, max_idx] {
            assert_eq!(Ref::pair(idx).decode(), Val::Pair(idx));
            assert_eq!(Ref::actor(idx).decode(), Val::Actor(idx));
            assert_eq!(Ref::actor(idx).cell(), idx);
        }

        for id in [0, 1, 99, u32::MAX] {
            assert_eq!(Ref::atom(id).as_atom(), id);
        }

        for p in [0, 1, 12345, PAYLOAD_MAX] {
            assert_eq!(Ref::func(p as usize).as_func(), p as usize);
            assert_eq!(Ref::object(p).as_object(), p);
        }

        assert!(TRUE.as_bool());
        assert!(!FALSE.as_bool());
        assert_eq!(Ref::from(true), TRUE);
        assert_ne!(TRUE.word(), FALSE.word());
    }

    #[test]
    fn kinds_distinct() {
        let refs = [
            Ref::pair(5),
            Ref::actor(5),
            Ref::atom(5),
            Ref::func(5),
            Ref::object(5),
            Ref::number(5),
            TRUE,
        ];
        let kinds = [
            Kind::Pair,
            Kind::Actor,
            Kind::Atom,
            Kind::Func,
            Kind::Object,
            Kind::Number,
            Kind::Bool,
        ];

        for (i, r) in refs.iter().enumerate() {
            assert_eq!(r.kind(), kinds[i]);
            for (j, s) in refs.iter().enumerate() {
                assert_eq!(i == j, r == s);
            }
        }

        assert!(!FALSE.pair_p());
        assert!(!TRUE.func_p());
        assert!(!Ref::number(0).nil_p());
    }

    #[test]
    #[should_panic]
    fn wrong_variant() {
        Ref::pair(3).as_number();
    }

    #[test]
    #[should_panic]
    fn atom_has_no_cell() {
        Ref::atom(3).cell();
    }
}
