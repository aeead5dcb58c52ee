// Treadle, an actor runtime on a treadmill heap.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Treadle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/actor.rs

// Actor configurations: a mailbox, a timer queue, and the budgeted
// dispatch loop that delivers one message at a time.

// <>

use super::core::{self, Shown};
use super::memmgt::{self, Heap};
use super::symtab::SymbolTable;
use super::tag::{Ref, NIL};

use std::collections::HashMap;
use std::fmt;
use std::mem;
use std::time::Instant;

/// Microseconds per second
pub const TICK_FREQ: i64 = 1_000_000;

/// Dispatches between clock refreshes
const CLOCK_STEP_SIZE: u32 = 256;

/// A behavior runs once per delivered message
pub type Behavior = fn(&mut Ctx<'_>);

/// World time: seconds and microseconds since a configuration began
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeVal {
    pub s: i64,
    pub us: i64,
}

impl TimeVal {
    /// Builds a time, carrying whole seconds out of `us`
    pub fn new(s: i64, us: i64) -> Self {
        Self {
            s: s + us.div_euclid(TICK_FREQ),
            us: us.rem_euclid(TICK_FREQ),
        }
    }

    pub fn increment(self, delta_us: i64) -> Self {
        Self::new(self.s, self.us + delta_us)
    }

    fn since(epoch: Instant) -> Self {
        let d = epoch.elapsed();
        Self::new(d.as_secs() as i64, d.subsec_micros() as i64)
    }
}

impl fmt::Display for TimeVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.s, self.us)
    }
}

/// Counters for reports
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub delivered: u64,
    pub pending: usize,
    pub limit: usize,
    pub delayed: usize,
    /// Queue cells in use
    pub pool_used: usize,
    /// Most queue cells ever in use at once
    pub pool_max: usize,
    pub behaviors: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "messages delivered {}; pending {}/{}; delayed {}; queue cells {} (max {}); behaviors {}",
            self.delivered,
            self.pending,
            self.limit,
            self.delayed,
            self.pool_used,
            self.pool_max,
            self.behaviors
        )
    }
}

/// One actor world
///
/// Queue entries are `(target . message)` pairs threaded through
/// `(entry . next)` nodes; timer nodes hold `(time . entry)` with the
/// time as `(s . us)`. All of these are permanent cells recycled
/// through `pool`, so messaging makes no garbage of its own.
pub struct Config {
    heap: Heap,
    symtab: SymbolTable,

    natives: Vec<Behavior>,
    native_ids: HashMap<usize, usize>,

    q_head: Ref,
    q_tail: Ref,
    q_count: usize,
    q_limit: usize,
    /// entry being delivered
    q_entry: Ref,

    t_queue: Ref,
    t_count: usize,

    gc_root: Ref,

    pool: Ref,
    pool_cnt: usize,
    pool_max: usize,

    msg_count: u64,
    epoch: Instant,
    now: TimeVal,
}

impl Config {
    /// A new world whose mailbox signals backpressure beyond `q_limit`
    /// pending messages
    pub fn new(q_limit: usize) -> Self {
        let epoch = Instant::now();

        log::debug!("new configuration (capacity {q_limit})");

        Self {
            heap: Heap::new(),
            symtab: SymbolTable::new(),
            natives: vec![],
            native_ids: HashMap::new(),
            q_head: NIL,
            q_tail: NIL,
            q_count: 0,
            q_limit,
            q_entry: NIL,
            t_queue: NIL,
            t_count: 0,
            gc_root: NIL,
            pool: NIL,
            pool_cnt: 0,
            pool_max: 0,
            msg_count: 0,
            epoch,
            now: TimeVal::since(epoch),
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn atom(&mut self, name: &str) -> Ref {
        Ref::atom(self.symtab.get_id(name))
    }

    pub fn atom_name(&self, r: Ref) -> Option<&str> {
        r.atom_p().then(|| self.symtab.name(r.as_atom())).flatten()
    }

    pub fn show(&self, r: Ref) -> Shown<'_> {
        Shown::new(&self.heap, &self.symtab, r)
    }

    pub fn now(&self) -> TimeVal {
        self.now
    }

    pub fn pending(&self) -> usize {
        self.q_count
    }

    pub fn delayed(&self) -> usize {
        self.t_count
    }

    pub fn limit(&self) -> usize {
        self.q_limit
    }

    pub fn delivered(&self) -> u64 {
        self.msg_count
    }

    // recycling pool

    fn pool_cons(&mut self, first: Ref, rest: Ref) -> Ref {
        let p = if self.pool.nil_p() {
            self.heap.perm(first, rest)
        } else {
            let p = self.pool;
            self.pool = self.heap.rest(p);
            self.heap.set_first(p, first);
            self.heap.set_rest(p, rest);
            p
        };

        self.pool_cnt += 1;
        self.pool_max = self.pool_max.max(self.pool_cnt);
        p
    }

    fn pool_free(&mut self, p: Ref) {
        self.heap.set_first(p, NIL);
        self.heap.set_rest(p, self.pool);
        self.pool = p;
        self.pool_cnt -= 1;
    }

    // behaviors

    fn native(&mut self, beh: Behavior) -> Ref {
        let key = beh as usize;
        let idx = match self.native_ids.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = self.natives.len();
                self.natives.push(beh);
                self.native_ids.insert(key, idx);
                idx
            }
        };
        Ref::func(idx)
    }

    fn behavior_of(&mut self, actor: Ref) -> Behavior {
        let f = self.heap.behavior(actor);
        self.natives[f.as_func()]
    }

    pub fn create_actor(&mut self, beh: Behavior, state: Ref) -> Ref {
        let f = self.native(beh);
        self.heap.actor_cell(f, state)
    }

    fn become_actor(&mut self, actor: Ref, beh: Behavior, state: Ref) {
        let f = self.native(beh);
        self.heap.set_actor(actor, f, state);
    }

    /// Keeps `r` alive across every collection
    pub fn add_gc_root(&mut self, r: Ref) {
        self.gc_root = self.heap.perm(r, self.gc_root);
    }

    // messaging

    fn enqueue(&mut self, entry: Ref) {
        let node = self.pool_cons(entry, NIL);
        if self.q_head.nil_p() {
            self.q_head = node;
        } else {
            self.heap.set_rest(self.q_tail, node);
        }
        self.q_tail = node;
        self.q_count += 1;
    }

    pub fn send(&mut self, target: Ref, msg: Ref) {
        assert!(target.actor_p(), "send to non-actor {target:?}");
        let entry = self.pool_cons(target, msg);
        self.enqueue(entry);
    }

    /// Schedules `msg` for delivery once `delay_us` microseconds of
    /// world time have passed
    pub fn send_after(&mut self, delay_us: i64, target: Ref, msg: Ref) {
        assert!(target.actor_p(), "send to non-actor {target:?}");

        let at = self.now.increment(delay_us);
        let entry = self.pool_cons(target, msg);
        let time = self.pool_cons(Ref::number(at.s), Ref::number(at.us));
        let t_entry = self.pool_cons(time, entry);

        // equal times keep send order
        let mut prev = NIL;
        let mut node = self.t_queue;
        while !node.nil_p() {
            if at < self.timer_due(node) {
                break;
            }
            prev = node;
            node = self.heap.rest(node);
        }

        let t_node = self.pool_cons(t_entry, node);
        if prev.nil_p() {
            self.t_queue = t_node;
        } else {
            self.heap.set_rest(prev, t_node);
        }
        self.t_count += 1;
    }

    fn timer_due(&mut self, t_node: Ref) -> TimeVal {
        let t_entry = self.heap.first(t_node);
        let time = self.heap.first(t_entry);
        let (s, us) = (self.heap.first(time), self.heap.rest(time));
        TimeVal {
            s: s.as_number(),
            us: us.as_number(),
        }
    }

    /// Refreshes the clock and moves every due timer to the mailbox
    pub fn tick(&mut self) {
        self.now = TimeVal::since(self.epoch);

        while !self.t_queue.nil_p() {
            let t_node = self.t_queue;
            if self.timer_due(t_node) > self.now {
                break;
            }

            let t_entry = self.heap.first(t_node);
            let time = self.heap.first(t_entry);
            let entry = self.heap.rest(t_entry);

            self.t_queue = self.heap.rest(t_node);
            self.t_count -= 1;

            self.enqueue(entry);
            self.pool_free(time);
            self.pool_free(t_entry);
            self.pool_free(t_node);
        }
    }

    /// Delivers one message; false if the mailbox is empty
    fn dispatch(&mut self) -> bool {
        if self.q_head.nil_p() {
            return false;
        }

        let node = self.q_head;
        let entry = self.heap.first(node);
        self.q_head = self.heap.rest(node);
        if self.q_head.nil_p() {
            self.q_tail = NIL;
        }
        self.pool_free(node);
        self.q_count -= 1;

        let target = self.heap.first(entry);
        let msg = self.heap.rest(entry);
        let beh = self.behavior_of(target);

        if cfg!(feature = "dspdbg") {
            println!("D {} <- {}", self.show(target), self.show(msg));
        }

        let outer = mem::replace(&mut self.q_entry, entry);
        beh(&mut Ctx {
            cfg: &mut *self,
            this: target,
            what: msg,
        });
        self.q_entry = outer;

        self.pool_free(entry);
        self.msg_count += 1;

        true
    }

    /// Delivers up to `budget` messages
    ///
    /// Returns the unspent budget once the mailbox empties, or -1 when
    /// the mailbox holds more than its capacity; the caller must then
    /// slow its producers before running again. A negative budget counts
    /// as zero.
    pub fn run(&mut self, budget: i32) -> i32 {
        if self.q_count > self.q_limit {
            return -1;
        }

        let mut budget = budget.max(0);
        let mut clock_step = 0;
        while budget > 0 {
            if clock_step == 0 {
                self.tick();
                clock_step = CLOCK_STEP_SIZE;
            }
            clock_step -= 1;

            if !self.dispatch() {
                break;
            }
            budget -= 1;

            if self.q_count > self.q_limit {
                log::debug!("mailbox over capacity ({}/{})", self.q_count, self.q_limit);
                return -1;
            }
        }

        budget
    }

    // collection

    /// Registered roots plus everything the queues hold
    pub fn gather_roots(&mut self) -> Vec<Ref> {
        let mut roots = vec![];

        let mut p = self.gc_root;
        while !p.nil_p() {
            roots.push(self.heap.first(p));
            p = self.heap.rest(p);
        }

        let mut pending = 0;
        let mut node = self.q_head;
        while !node.nil_p() {
            let entry = self.heap.first(node);
            roots.push(self.heap.first(entry));
            roots.push(self.heap.rest(entry));
            pending += 1;
            node = self.heap.rest(node);
        }
        assert_eq!(pending, self.q_count, "mailbox count out of step");

        let mut delayed = 0;
        let mut node = self.t_queue;
        while !node.nil_p() {
            let t_entry = self.heap.first(node);
            let entry = self.heap.rest(t_entry);
            roots.push(self.heap.first(entry));
            roots.push(self.heap.rest(entry));
            delayed += 1;
            node = self.heap.rest(node);
        }
        assert_eq!(delayed, self.t_count, "timer count out of step");

        if !self.q_entry.nil_p() {
            roots.push(self.heap.first(self.q_entry));
            roots.push(self.heap.rest(self.q_entry));
        }

        roots
    }

    /// Collects synchronously
    pub fn force_gc(&mut self) {
        let roots = self.gather_roots();
        self.heap.full_collect(&roots);
    }

    /// Starts a collection that traces one cell per dispatch
    pub fn start_gc(&mut self) -> bool {
        let roots = self.gather_roots();
        memmgt::start_concurrent_collect(self, &roots)
    }

    // reports

    pub fn stats(&self) -> Stats {
        Stats {
            delivered: self.msg_count,
            pending: self.q_count,
            limit: self.q_limit,
            delayed: self.t_count,
            pool_used: self.pool_cnt,
            pool_max: self.pool_max,
            behaviors: self.natives.len(),
        }
    }

    pub fn report(&self) {
        log::info!("{}", self.stats());
        self.heap.report_usage();
    }
}

/// What a behavior sees while it runs: its own identity, the message,
/// and the world it may act on
pub struct Ctx<'a> {
    cfg: &'a mut Config,
    this: Ref,
    what: Ref,
}

impl Ctx<'_> {
    /// The actor receiving the message
    pub fn this(&self) -> Ref {
        self.this
    }

    /// The message
    pub fn what(&self) -> Ref {
        self.what
    }

    /// Current state of the receiving actor
    pub fn mine(&mut self) -> Ref {
        self.cfg.heap.state(self.this)
    }

    /// Current behavior of the receiving actor
    pub fn behavior(&mut self) -> Behavior {
        let me = self.this;
        self.cfg.behavior_of(me)
    }

    pub fn now(&self) -> TimeVal {
        self.cfg.now
    }

    pub fn send(&mut self, target: Ref, msg: Ref) {
        self.cfg.send(target, msg);
    }

    pub fn send_after(&mut self, delay_us: i64, target: Ref, msg: Ref) {
        self.cfg.send_after(delay_us, target, msg);
    }

    pub fn actor(&mut self, beh: Behavior, state: Ref) -> Ref {
        self.cfg.create_actor(beh, state)
    }

    /// Replaces this actor's behavior and state from its next message on
    pub fn become_(&mut self, beh: Behavior, state: Ref) {
        let me = self.this;
        self.cfg.become_actor(me, beh, state);
    }

    pub fn heap(&mut self) -> &mut Heap {
        &mut self.cfg.heap
    }

    pub fn cons(&mut self, first: Ref, rest: Ref) -> Ref {
        self.cfg.heap.cons(first, rest)
    }

    pub fn atom(&mut self, name: &str) -> Ref {
        self.cfg.atom(name)
    }

    pub fn atom_name(&self, r: Ref) -> Option<&str> {
        self.cfg.atom_name(r)
    }

    pub fn show(&self, r: Ref) -> Shown<'_> {
        self.cfg.show(r)
    }
}

/// Ignores every message
pub fn sink_beh(_ctx: &mut Ctx<'_>) {}

/// Reports every message it receives as an error
pub fn error_beh(ctx: &mut Ctx<'_>) {
    log::error!("=ERROR= {}", ctx.show(ctx.what()));
}

/// Expects one message equal to `expect` in its state map, then sinks
///
/// State keys: `expect`, and an optional atom under `message` naming
/// the check.
pub fn assert_beh(ctx: &mut Ctx<'_>) {
    let state = ctx.mine();
    let (k_expect, k_message) = (ctx.atom("expect"), ctx.atom("message"));
    let expect = core::map_get_def(ctx.heap(), state, k_expect, NIL);
    let message = core::map_get_def(ctx.heap(), state, k_message, NIL);
    let actual = ctx.what();

    if !core::equal(ctx.heap(), expect, actual) {
        let label = ctx.atom_name(message).unwrap_or("").to_string();
        log::error!(
            "expect={} actual={}",
            ctx.show(expect),
            ctx.show(actual)
        );
        panic!("assert_beh: FAILED! {label}");
    }

    ctx.become_(sink_beh, NIL);
}
