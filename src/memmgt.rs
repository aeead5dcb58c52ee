// Treadle, an actor runtime on a treadmill heap.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Treadle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/memmgt.rs

// Memory management for Treadle. An arena of pair cells threaded onto
// five intrusive lists (free, fresh, aged, scan, perm), and the
// Treadmill collector that moves cells between them a step at a time.

// <>

use super::actor::{Config, Ctx};
use super::tag::{Kind, Ref, NIL};

use std::fmt;

/// Cells added to a list each time it runs dry
pub const BLOCK_CELLS: usize = 256;

const LINK_BITS: u32 = 62;
const LINK_MASK: u64 = (1 << LINK_BITS) - 1;

/// Collector mark, kept in the top two bits of a cell's back link
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Mark {
    /// Sentinel and list heads
    Z = 0b00,
    /// Permanent cells
    X = 0b01,
    P0 = 0b10,
    P1 = 0b11,
}

impl Mark {
    fn from_bits(b: u64) -> Self {
        match b & 0b11 {
            0b00 => Mark::Z,
            0b01 => Mark::X,
            0b10 => Mark::P0,
            _ => Mark::P1,
        }
    }
}

/// The five lists; each head is a cell in the arena
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum GcList {
    Free = 1,
    Fresh = 2,
    Aged = 3,
    Scan = 4,
    Perm = 5,
}

impl GcList {
    pub const ALL: [GcList; 5] = [
        GcList::Free,
        GcList::Fresh,
        GcList::Aged,
        GcList::Scan,
        GcList::Perm,
    ];

    #[inline(always)]
    fn head(self) -> usize {
        self as usize
    }

    #[inline(always)]
    fn slot(self) -> usize {
        self as usize - 1
    }
}

const FIRST_CELL: usize = 6;

#[derive(Clone, Copy)]
struct Cell {
    first: Ref,
    rest: Ref,
    /// back link, with the mark in the top two bits
    prev: u64,
    next: u64,
}

impl Cell {
    const fn unlinked(idx: usize, mark: Mark) -> Self {
        Self {
            first: NIL,
            rest: NIL,
            prev: idx as u64 | (mark as u64) << LINK_BITS,
            next: idx as u64,
        }
    }
}

/// Snapshot of list sizes, for reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Usage {
    pub free: usize,
    pub fresh: usize,
    pub aged: usize,
    pub scan: usize,
    /// Permanent cells not yet handed out
    pub perm: usize,
    /// Permanent cells in use
    pub fixed: usize,
    /// Every cell in the arena except the sentinel and list heads
    pub total: usize,
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "free={} fresh={} aged={} scan={} perm={} fixed={} total={}",
            self.free, self.fresh, self.aged, self.scan, self.perm, self.fixed, self.total
        )
    }
}

/// Cell arena and Treadmill collector
///
/// Cell 0 is `NIL`, cells 1 through 5 head the lists in `GcList`.
/// Reads and writes of cell fields go through an access barrier which
/// keeps any cell touched during a collection cycle alive for that
/// cycle.
pub struct Heap {
    cells: Vec<Cell>,
    sizes: [usize; 5],
    phase: Mark,
    prev_phase: Mark,
    /// high between `age` and `sweep`
    cycle: bool,
    cycles: u64,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        let cells = (0..FIRST_CELL).map(|i| Cell::unlinked(i, Mark::Z)).collect();

        Self {
            cells,
            sizes: [0; 5],
            phase: Mark::P1,
            prev_phase: Mark::P0,
            cycle: false,
            cycles: 0,
        }
    }

    // link fields

    #[inline(always)]
    fn next(&self, i: usize) -> usize {
        self.cells[i].next as usize
    }

    #[inline(always)]
    fn prev(&self, i: usize) -> usize {
        (self.cells[i].prev & LINK_MASK) as usize
    }

    #[inline(always)]
    fn set_next(&mut self, i: usize, n: usize) {
        self.cells[i].next = n as u64;
    }

    #[inline(always)]
    fn set_prev(&mut self, i: usize, p: usize) {
        let c = &mut self.cells[i];
        c.prev = (c.prev & !LINK_MASK) | (p as u64 & LINK_MASK);
    }

    #[inline(always)]
    fn mark(&self, i: usize) -> Mark {
        Mark::from_bits(self.cells[i].prev >> LINK_BITS)
    }

    #[inline(always)]
    fn set_mark(&mut self, i: usize, m: Mark) {
        let c = &mut self.cells[i];
        c.prev = (c.prev & LINK_MASK) | (m as u64) << LINK_BITS;
    }

    // list primitives

    /// Links `x` in just before `y`
    fn insert_before(&mut self, y: usize, x: usize) {
        let p = self.prev(y);
        self.set_next(x, y);
        self.set_prev(x, p);
        self.set_next(p, x);
        self.set_prev(y, x);
    }

    /// Links `x` in just after `y`
    fn insert_after(&mut self, y: usize, x: usize) {
        let n = self.next(y);
        self.set_prev(x, y);
        self.set_next(x, n);
        self.set_prev(n, x);
        self.set_next(y, x);
    }

    /// Unlinks `x` from whatever list holds it
    fn extract(&mut self, x: usize) {
        let (p, n) = (self.prev(x), self.next(x));
        self.set_next(p, n);
        self.set_prev(n, p);
        self.set_next(x, x);
        self.set_prev(x, x);
    }

    fn push(&mut self, list: GcList, x: usize) {
        self.insert_after(list.head(), x);
        self.sizes[list.slot()] += 1;
    }

    fn put(&mut self, list: GcList, x: usize) {
        self.insert_before(list.head(), x);
        self.sizes[list.slot()] += 1;
    }

    fn pop(&mut self, list: GcList) -> Option<usize> {
        let h = list.head();
        let x = self.next(h);
        if x == h {
            return None;
        }
        self.extract(x);
        self.sizes[list.slot()] -= 1;
        Some(x)
    }

    fn pull(&mut self, list: GcList) -> Option<usize> {
        let h = list.head();
        let x = self.prev(h);
        if x == h {
            return None;
        }
        self.extract(x);
        self.sizes[list.slot()] -= 1;
        Some(x)
    }

    /// Splices all of `from` onto the tail of `to`
    fn append_list(&mut self, to: GcList, from: GcList) {
        let (t, f) = (to.head(), from.head());
        let first = self.next(f);
        if first == f {
            return;
        }
        let last = self.prev(f);
        let tail = self.prev(t);

        self.set_next(tail, first);
        self.set_prev(first, tail);
        self.set_next(last, t);
        self.set_prev(t, last);

        self.set_next(f, f);
        self.set_prev(f, f);

        self.sizes[to.slot()] += self.sizes[from.slot()];
        self.sizes[from.slot()] = 0;
    }

    /// Adds a block of unused cells to the tail of `list`
    fn allocate_cells(&mut self, list: GcList) {
        let base = self.cells.len();
        assert!(
            (base + BLOCK_CELLS) as u64 <= super::tag::INDEX_MAX,
            "cell arena exhausted"
        );

        self.cells
            .extend((base..base + BLOCK_CELLS).map(|i| Cell::unlinked(i, Mark::Z)));
        for i in base..base + BLOCK_CELLS {
            self.put(list, i);
        }

        log::debug!(
            "allocated {BLOCK_CELLS} cells onto {list:?} (arena {})",
            self.cells.len()
        );
    }

    // allocation

    /// Allocates a collectable cell
    pub fn cons(&mut self, first: Ref, rest: Ref) -> Ref {
        if self.size(GcList::Free) == 0 {
            self.allocate_cells(GcList::Free);
        }
        let Some(i) = self.pop(GcList::Free) else {
            panic!("free list empty after refill");
        };

        self.set_mark(i, self.phase);
        self.cells[i].first = first;
        self.cells[i].rest = rest;
        self.put(GcList::Fresh, i);

        self.shade(first);
        self.shade(rest);

        if cfg!(feature = "memdbg") {
            println!("C {i} BIRTH (m {:?})", self.phase);
        }

        Ref::pair(i)
    }

    /// Allocates a cell the collector never scans or sweeps
    pub fn perm(&mut self, first: Ref, rest: Ref) -> Ref {
        if self.size(GcList::Perm) == 0 {
            self.allocate_cells(GcList::Perm);
        }
        let Some(i) = self.pull(GcList::Perm) else {
            panic!("perm reserve empty after refill");
        };

        self.set_mark(i, Mark::X);
        self.cells[i].first = first;
        self.cells[i].rest = rest;

        self.shade(first);
        self.shade(rest);

        if cfg!(feature = "memdbg") {
            println!("C {i} PERM");
        }

        Ref::pair(i)
    }

    /// Allocates a collectable actor cell
    pub fn actor_cell(&mut self, beh: Ref, state: Ref) -> Ref {
        assert!(beh.func_p(), "actor behavior {beh:?} is not a function");
        Ref::actor(self.cons(beh, state).cell())
    }

    // barrier

    /// Promotes the cell behind `r` if the current cycle has not yet
    /// seen it; returns its index
    fn check_access(&mut self, r: Ref) -> usize {
        let i = r.cell();
        if self.mark(i) == self.prev_phase {
            self.scan_cell(i);
        }
        i
    }

    /// Stored references are promoted during a cycle
    fn shade(&mut self, r: Ref) {
        if self.cycle {
            self.scan_value(r);
        }
    }

    pub fn first(&mut self, r: Ref) -> Ref {
        if r.nil_p() {
            return NIL;
        }
        assert!(r.pair_p(), "first of non-pair {r:?}");
        let i = self.check_access(r);
        self.cells[i].first
    }

    pub fn rest(&mut self, r: Ref) -> Ref {
        if r.nil_p() {
            return NIL;
        }
        assert!(r.pair_p(), "rest of non-pair {r:?}");
        let i = self.check_access(r);
        self.cells[i].rest
    }

    pub fn set_first(&mut self, r: Ref, v: Ref) {
        assert!(r.pair_p() && !r.nil_p(), "set_first on {r:?}");
        let i = self.check_access(r);
        self.cells[i].first = v;
        self.shade(v);
    }

    pub fn set_rest(&mut self, r: Ref, v: Ref) {
        assert!(r.pair_p() && !r.nil_p(), "set_rest on {r:?}");
        let i = self.check_access(r);
        self.cells[i].rest = v;
        self.shade(v);
    }

    /// Behavior reference of an actor
    pub fn behavior(&mut self, a: Ref) -> Ref {
        assert!(a.actor_p(), "behavior of non-actor {a:?}");
        let i = self.check_access(a);
        self.cells[i].first
    }

    /// State of an actor
    pub fn state(&mut self, a: Ref) -> Ref {
        assert!(a.actor_p(), "state of non-actor {a:?}");
        let i = self.check_access(a);
        self.cells[i].rest
    }

    pub(crate) fn set_actor(&mut self, a: Ref, beh: Ref, state: Ref) {
        assert!(a.actor_p(), "become on non-actor {a:?}");
        assert!(beh.func_p(), "actor behavior {beh:?} is not a function");
        let i = self.check_access(a);
        self.cells[i].first = beh;
        self.cells[i].rest = state;
        self.shade(state);
    }

    /// Reads a cell without the barrier; for printing only
    pub(crate) fn peek(&self, r: Ref) -> (Ref, Ref) {
        let c = &self.cells[r.cell()];
        (c.first, c.rest)
    }

    // collection

    /// Moves an aged cell to the scan list, if it is still marked with
    /// the previous phase
    fn scan_cell(&mut self, i: usize) {
        let m = self.mark(i);
        if m != self.prev_phase {
            return;
        }
        assert!(
            self.size(GcList::Aged) > 0,
            "cell {i} marked {m:?} but the aged list is empty"
        );

        self.extract(i);
        self.sizes[GcList::Aged.slot()] -= 1;
        self.set_mark(i, self.phase);
        self.put(GcList::Scan, i);
    }

    /// Scans the cell behind a pair or actor reference
    pub fn scan_value(&mut self, r: Ref) {
        match r.kind() {
            Kind::Pair if !r.nil_p() => self.scan_cell(r.cell()),
            Kind::Actor => self.scan_cell(r.cell()),
            _ => (),
        }
    }

    /// Starts a cycle: every fresh cell becomes a candidate
    pub fn age(&mut self) {
        assert!(!self.cycle, "collection already in progress");

        self.append_list(GcList::Aged, GcList::Fresh);
        self.prev_phase = self.phase;
        self.phase = match self.phase {
            Mark::P0 => Mark::P1,
            _ => Mark::P0,
        };
        self.cycle = true;

        log::debug!(
            "gc cycle {} aged {} cells, phase {:?}",
            self.cycles + 1,
            self.size(GcList::Aged),
            self.phase
        );
    }

    /// Ages the heap and scans the given roots
    pub fn begin_collect(&mut self, roots: &[Ref]) {
        self.age();
        for &r in roots {
            self.scan_value(r);
        }
    }

    /// Traces one cell from the scan list; false when none remain
    pub fn trace_step(&mut self) -> bool {
        let Some(i) = self.pop(GcList::Scan) else {
            return false;
        };

        let Cell { first, rest, .. } = self.cells[i];
        self.scan_value(first);
        self.scan_value(rest);
        self.push(GcList::Fresh, i);

        true
    }

    /// Frees every candidate the trace did not reach
    pub fn sweep(&mut self) {
        if !self.cycle {
            log::debug!("sweep with no collection in progress");
            return;
        }
        assert_eq!(self.size(GcList::Scan), 0, "sweep with cells left to trace");

        let dead = self.size(GcList::Aged);

        if cfg!(feature = "memdbg") {
            let h = GcList::Aged.head();
            let mut i = self.next(h);
            while i != h {
                println!("C {i} DEATH");
                i = self.next(i);
            }
        }

        self.append_list(GcList::Free, GcList::Aged);
        self.cycle = false;
        self.cycles += 1;

        log::debug!("gc cycle {} swept {dead} cells", self.cycles);

        if cfg!(debug_assertions) {
            for list in GcList::ALL {
                self.sanity_check(list);
            }
        }
    }

    /// Runs a whole cycle from the given roots, finishing any cycle
    /// already underway first
    pub fn full_collect(&mut self, roots: &[Ref]) {
        if self.cycle {
            self.finish_collect();
        }
        self.begin_collect(roots);
        self.finish_collect();
    }

    fn finish_collect(&mut self) {
        while self.trace_step() {}
        self.sweep();
    }

    pub fn collecting(&self) -> bool {
        self.cycle
    }

    /// Completed collection cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// The phase newly scanned cells are marked with
    pub fn phase(&self) -> Mark {
        self.phase
    }

    pub fn mark_of(&self, r: Ref) -> Mark {
        self.mark(r.cell())
    }

    // diagnostics

    /// Cached size of a list
    pub fn size(&self, list: GcList) -> usize {
        self.sizes[list.slot()]
    }

    /// Size of a list by traversal
    pub fn count(&self, list: GcList) -> usize {
        let h = list.head();
        let mut n = 0;
        let mut i = self.next(h);
        while i != h {
            n += 1;
            i = self.next(i);
        }
        n
    }

    /// Checks every link of a list and its cached size; panics on any
    /// inconsistency
    pub fn sanity_check(&self, list: GcList) {
        let h = list.head();
        let len = self.cells.len();

        let mut n = 0;
        let mut p = h;
        loop {
            let q = self.next(p);
            if q >= len || self.prev(q) != p {
                self.corrupt(list, p, q);
            }
            if q == h {
                break;
            }
            if n > len {
                self.corrupt(list, p, q);
            }
            n += 1;
            p = q;
        }

        if n != self.size(list) {
            log::error!(
                "{list:?} holds {n} cells but records {} ({})",
                self.size(list),
                self.usage()
            );
            panic!("{list:?} size mismatch");
        }
    }

    fn corrupt(&self, list: GcList, p: usize, q: usize) -> ! {
        log::error!("{list:?} link {p} -> {q} is broken ({})", self.usage());
        panic!("corrupt {list:?} list at cell {p}");
    }

    pub fn usage(&self) -> Usage {
        let total = self.cells.len() - FIRST_CELL;
        let listed: usize = self.sizes.iter().sum();
        Usage {
            free: self.size(GcList::Free),
            fresh: self.size(GcList::Fresh),
            aged: self.size(GcList::Aged),
            scan: self.size(GcList::Scan),
            perm: self.size(GcList::Perm),
            fixed: total - listed,
            total,
        }
    }

    /// Logs list sizes after checking every list
    pub fn report_usage(&self) -> Usage {
        for list in GcList::ALL {
            self.sanity_check(list);
        }
        let usage = self.usage();
        log::info!(
            "cells: {usage}; {} cycles, phase {:?}",
            self.cycles(),
            self.phase()
        );
        usage
    }
}

/// One trace step per message; sweeps once nothing is left to trace
fn scanning_beh(ctx: &mut Ctx<'_>) {
    if ctx.heap().trace_step() {
        let me = ctx.this();
        ctx.send(me, NIL);
    } else {
        ctx.heap().sweep();
        ctx.become_(super::actor::sink_beh, NIL);
    }
}

/// Starts a collection whose tracing runs as an actor, one step per
/// dispatch, interleaved with everything else in the mailbox
///
/// Returns false (doing nothing) if a cycle is already in progress.
pub fn start_concurrent_collect(cfg: &mut Config, roots: &[Ref]) -> bool {
    if cfg.heap().collecting() {
        log::warn!("collection already in progress");
        return false;
    }

    cfg.heap_mut().begin_collect(roots);
    let gc = cfg.create_actor(scanning_beh, NIL);
    cfg.send(gc, NIL);

    true
}

#[cfg(test)]
impl Heap {
    fn members(&self, list: GcList) -> Vec<usize> {
        let h = list.head();
        let mut out = vec![];
        let mut i = self.next(h);
        while i != h {
            out.push(i);
            i = self.next(i);
        }
        out.sort_unstable();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = BLOCK_CELLS;

    fn sizes(hp: &Heap) -> [usize; 4] {
        [
            hp.size(GcList::Aged),
            hp.size(GcList::Scan),
            hp.size(GcList::Fresh),
            hp.size(GcList::Free),
        ]
    }

    fn check_all(hp: &Heap) {
        for list in GcList::ALL {
            hp.sanity_check(list);
            assert_eq!(hp.count(list), hp.size(list));
        }
    }

    #[test]
    fn nil_sentinel() {
        let mut hp = Heap::new();
        assert_eq!(hp.first(NIL), NIL);
        assert_eq!(hp.rest(NIL), NIL);

        let mut s = NIL;
        for n in 0..1000 {
            s = hp.cons(Ref::number(n), s);
        }
        assert_eq!(hp.first(s), Ref::number(999));
        hp.full_collect(&[]);
        hp.full_collect(&[]);

        assert_eq!(hp.first(NIL), NIL);
        assert_eq!(hp.rest(NIL), NIL);
        assert_eq!(hp.peek(NIL), (NIL, NIL));
        assert_eq!(hp.mark_of(NIL), Mark::Z);
    }

    #[test]
    fn treadmill_steps() {
        let mut hp = Heap::new();
        check_all(&hp);

        hp.allocate_cells(GcList::Free);
        hp.sanity_check(GcList::Free);
        assert_eq!(hp.size(GcList::Free), N);

        let mut s = NIL;
        s = hp.cons(Ref::number(1), s);
        s = hp.cons(Ref::number(2), s);
        let tail = hp.rest(s);
        s = hp.cons(Ref::number(-2), tail);
        check_all(&hp);
        assert_eq!(sizes(&hp), [0, 0, 3, N - 3]);

        hp.age();
        assert_eq!(sizes(&hp), [3, 0, 0, N - 3]);

        hp.scan_value(s);
        assert_eq!(sizes(&hp), [2, 1, 0, N - 3]);

        // the barrier promotes the second cell on access
        let rr = hp.rest(s);
        let rrr = hp.rest(rr);
        let r = hp.cons(Ref::number(-1), rrr);
        assert_eq!(sizes(&hp), [1, 2, 1, N - 4]);

        assert!(hp.trace_step());
        assert_eq!(sizes(&hp), [1, 1, 2, N - 4]);
        assert!(hp.trace_step());
        assert_eq!(sizes(&hp), [1, 0, 3, N - 4]);
        assert!(!hp.trace_step());
        assert_eq!(sizes(&hp), [1, 0, 3, N - 4]);

        hp.sweep();
        assert_eq!(sizes(&hp), [0, 0, 3, N - 3]);

        hp.age();
        assert_eq!(sizes(&hp), [3, 0, 0, N - 3]);
        hp.scan_value(r);
        assert_eq!(sizes(&hp), [2, 1, 0, N - 3]);
        assert!(hp.trace_step());
        assert_eq!(sizes(&hp), [2, 0, 1, N - 3]);
        assert!(!hp.trace_step());
        hp.sweep();
        assert_eq!(sizes(&hp), [0, 0, 1, N - 1]);

        hp.full_collect(&[r]);
        assert_eq!(sizes(&hp), [0, 0, 1, N - 1]);
        assert_eq!(hp.first(r), Ref::number(-1));
        assert_eq!(hp.rest(r), NIL);

        check_all(&hp);
    }

    #[test]
    fn full_collect_liveness() {
        let mut hp = Heap::new();

        let mut keep = NIL;
        let mut junk = NIL;
        for n in 0..300 {
            keep = hp.cons(Ref::number(n), keep);
            junk = hp.cons(Ref::number(-n), junk);
        }
        let nested = hp.cons(keep, Ref::number(7));
        let before = hp.usage();
        assert_eq!(before.fresh, 601);

        hp.full_collect(&[nested]);

        let after = hp.usage();
        assert_eq!(after.fresh, 301);
        assert_eq!(after.aged, 0);
        assert_eq!(after.scan, 0);
        assert_eq!(after.free, before.free + 300);

        // contents survive unchanged
        let mut p = hp.first(nested);
        for n in (0..300).rev() {
            assert_eq!(hp.first(p), Ref::number(n));
            p = hp.rest(p);
        }
        assert_eq!(p, NIL);
        assert_eq!(hp.rest(nested), Ref::number(7));

        // a second pass with no roots frees everything
        hp.full_collect(&[]);
        assert_eq!(hp.size(GcList::Fresh), 0);
        check_all(&hp);
    }

    fn build(hp: &mut Heap) -> Vec<Ref> {
        let mut roots = vec![];
        let mut s = NIL;
        for n in 0..40 {
            s = hp.cons(Ref::number(n), s);
            if n % 3 == 0 {
                let t = hp.cons(s, Ref::number(n));
                roots.push(t);
            } else {
                hp.cons(Ref::number(n), Ref::number(n));
            }
        }
        roots.truncate(5);
        roots
    }

    #[test]
    fn stepwise_matches_full() {
        let (mut a, mut b) = (Heap::new(), Heap::new());
        let roots_a = build(&mut a);
        let roots_b = build(&mut b);
        assert_eq!(roots_a, roots_b);

        a.full_collect(&roots_a);

        b.begin_collect(&roots_b);
        let mut steps = 0;
        while b.trace_step() {
            steps += 1;
        }
        b.sweep();

        assert!(steps > 0);
        assert_eq!(a.members(GcList::Free), b.members(GcList::Free));
        assert_eq!(a.members(GcList::Fresh), b.members(GcList::Fresh));
        assert_eq!(a.usage(), b.usage());
    }

    #[test]
    fn barrier_keeps_moved_refs() {
        let mut hp = Heap::new();
        let inner = hp.cons(Ref::number(1), NIL);
        let holder = hp.cons(inner, NIL);

        hp.begin_collect(&[holder]);

        // move the only reference into a cell born during the cycle
        let moved = hp.first(holder);
        hp.set_first(holder, NIL);
        let fresh = hp.cons(moved, NIL);

        while hp.trace_step() {}
        hp.sweep();

        assert_eq!(hp.mark_of(inner), hp.phase());
        let kept = hp.first(fresh);
        assert_eq!(hp.first(kept), Ref::number(1));
    }

    #[test]
    fn stores_shade_during_cycle() {
        let mut hp = Heap::new();
        let dst = hp.cons(NIL, NIL);
        let a = hp.actor_cell(Ref::func(0), NIL);
        let x = hp.cons(Ref::number(1), NIL);
        let y = hp.cons(Ref::number(2), NIL);
        let z = hp.cons(Ref::number(3), NIL);
        let src = hp.cons(x, y);
        let src2 = hp.cons(z, NIL);
        assert_eq!(hp.size(GcList::Fresh), 7);

        // the stores land in cells the trace has already finished with
        hp.begin_collect(&[dst, a]);
        while hp.trace_step() {}
        assert_eq!(hp.mark_of(dst), hp.phase());
        assert_eq!(hp.mark_of(a), hp.phase());

        let (mx, my) = (hp.first(src), hp.rest(src));
        let mz = hp.first(src2);
        assert_eq!((mx, my, mz), (x, y, z));
        hp.set_first(src, NIL);
        hp.set_rest(src, NIL);
        hp.set_first(src2, NIL);

        hp.set_first(dst, mx);
        hp.set_rest(dst, my);
        hp.set_actor(a, Ref::func(1), mz);

        while hp.trace_step() {}
        hp.sweep();

        for r in [x, y, z] {
            assert_eq!(hp.mark_of(r), hp.phase());
        }
        assert_eq!(hp.usage().fresh, 7);
        assert_eq!(hp.usage().aged, 0);

        let kept = hp.first(dst);
        assert_eq!(hp.first(kept), Ref::number(1));
        let kept = hp.rest(dst);
        assert_eq!(hp.first(kept), Ref::number(2));
        let kept = hp.state(a);
        assert_eq!(hp.first(kept), Ref::number(3));
        check_all(&hp);
    }

    #[test]
    fn perm_store_shades() {
        let mut hp = Heap::new();
        let x = hp.cons(Ref::number(5), NIL);
        let src = hp.cons(x, NIL);

        hp.begin_collect(&[]);
        let moved = hp.first(src);
        hp.set_first(src, NIL);
        let p = hp.perm(moved, NIL);

        while hp.trace_step() {}
        hp.sweep();

        assert_eq!(hp.mark_of(x), hp.phase());
        let kept = hp.first(p);
        assert_eq!(hp.first(kept), Ref::number(5));
        check_all(&hp);
    }

    #[test]
    fn perm_cells_stay() {
        let mut hp = Heap::new();
        let p = hp.perm(Ref::number(3), NIL);
        let held = hp.cons(Ref::number(4), NIL);
        hp.set_rest(p, held);

        hp.full_collect(&[]);

        assert_eq!(hp.mark_of(p), Mark::X);
        assert_eq!(hp.first(p), Ref::number(3));
        assert_eq!(hp.usage().fixed, 1);
        assert_eq!(hp.usage().perm, N - 1);
        check_all(&hp);
    }

    #[test]
    fn mark_in_link_word() {
        let mut hp = Heap::new();
        let a = hp.cons(NIL, NIL);
        let b = hp.cons(NIL, NIL);
        let (ia, ib) = (a.cell(), b.cell());

        assert_eq!(hp.prev(ib), ia);
        hp.set_mark(ib, Mark::X);
        assert_eq!(hp.prev(ib), ia);
        assert_eq!(hp.mark(ib), Mark::X);
        hp.set_prev(ib, ia);
        assert_eq!(hp.mark(ib), Mark::X);
    }

    #[test]
    fn actors_share_cells() {
        let mut hp = Heap::new();
        let a = hp.actor_cell(Ref::func(0), Ref::number(9));
        assert!(a.actor_p());
        assert_eq!(hp.state(a), Ref::number(9));
        assert_eq!(hp.behavior(a), Ref::func(0));
        assert_eq!(hp.size(GcList::Fresh), 1);

        hp.full_collect(&[a]);
        assert_eq!(hp.size(GcList::Fresh), 1);
        hp.full_collect(&[]);
        assert_eq!(hp.size(GcList::Fresh), 0);
    }

    #[test]
    #[should_panic]
    fn actor_as_pair() {
        let mut hp = Heap::new();
        let a = hp.actor_cell(Ref::func(0), NIL);
        hp.first(a);
    }

    #[test]
    #[should_panic]
    fn write_nil() {
        let mut hp = Heap::new();
        hp.set_rest(NIL, Ref::number(1));
    }

    #[test]
    #[should_panic]
    fn size_mismatch() {
        let mut hp = Heap::new();
        hp.cons(NIL, NIL);
        hp.sizes[GcList::Fresh.slot()] += 1;
        hp.sanity_check(GcList::Fresh);
    }
}
