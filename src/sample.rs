// Treadle, an actor runtime on a treadmill heap.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Treadle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/sample.rs

// Sample hand-written actors: printers, a greeter, and a ticker that
// counts off seconds with delayed messages.

// <>

use super::actor::{sink_beh, Config, Ctx, TICK_FREQ};
use super::core::{map_get_def, map_put};
use super::tag::{Ref, NIL};

use std::io::{self, Write};

/// Delay between ticker messages
pub const TICK_PERIOD_US: i64 = TICK_FREQ / 3;

fn get(ctx: &mut Ctx<'_>, map: Ref, key: &str) -> Ref {
    let key = ctx.atom(key);
    map_get_def(ctx.heap(), map, key, NIL)
}

fn put(ctx: &mut Ctx<'_>, map: Ref, key: &str, val: Ref) -> Ref {
    let key = ctx.atom(key);
    map_put(ctx.heap(), map, key, val)
}

/// The `text` of a message; atoms come out bare
fn text_of(ctx: &mut Ctx<'_>) -> String {
    let what = ctx.what();
    let text = get(ctx, what, "text");
    match ctx.atom_name(text) {
        Some(name) => name.to_string(),
        None => ctx.show(text).to_string(),
    }
}

pub fn print_text_beh(ctx: &mut Ctx<'_>) {
    let text = text_of(ctx);
    print!("{text}");
    let _ = io::stdout().flush();
}

pub fn print_line_beh(ctx: &mut Ctx<'_>) {
    let text = text_of(ctx);
    println!("{text}");
}

/// Greets the `name` in each message, signed with its own state
pub fn hello_beh(ctx: &mut Ctx<'_>) {
    let what = ctx.what();
    let name = get(ctx, what, "name");
    let printer = ctx.actor(print_text_beh, NIL);

    let hello = ctx.atom("Hello, ");
    let msg = put(ctx, NIL, "text", hello);
    ctx.send(printer, msg);

    let mine = ctx.mine();
    ctx.send(printer, mine);

    let from = ctx.atom(" from ");
    let msg = put(ctx, NIL, "text", from);
    ctx.send(printer, msg);

    let line = ctx.actor(print_line_beh, NIL);
    let msg = put(ctx, NIL, "text", name);
    ctx.send(line, msg);
}

/// Sends itself one fewer than its state until zero, then stops
pub fn countdown_beh(ctx: &mut Ctx<'_>) {
    let n = ctx.mine().as_number();
    if n > 0 {
        let me = ctx.this();
        ctx.send(me, Ref::number(n - 1));
        ctx.become_(countdown_beh, Ref::number(n - 1));
    } else {
        log::debug!("countdown done");
        ctx.become_(sink_beh, NIL);
    }
}

/// Prints each second it is told of, counting down from `count`; at
/// zero stops whoever sent the tick
pub fn each_second_beh(ctx: &mut Ctx<'_>) {
    let (what, mine) = (ctx.what(), ctx.mine());
    let count = get(ctx, mine, "count");
    let tick = get(ctx, what, "time");
    let ticker = get(ctx, what, "from");

    let line = ctx.actor(print_line_beh, NIL);
    let msg = put(ctx, NIL, "text", tick);
    ctx.send(line, msg);

    if !count.number_p() {
        return;
    }

    let n = count.as_number();
    if n <= 0 {
        if ticker.actor_p() {
            let stop = ctx.atom("stop");
            let msg = put(ctx, NIL, "op", stop);
            ctx.send(ticker, msg);
        }
        ctx.become_(sink_beh, NIL);
        return;
    }

    let state = put(ctx, NIL, "count", Ref::number(n - 1));
    let me = ctx.behavior();
    ctx.become_(me, state);
}

/// Wakes every third of a second; tells `sec` whenever the whole
/// second changes, and stops on `{op: stop}`
pub fn ticker_beh(ctx: &mut Ctx<'_>) {
    let (what, mine) = (ctx.what(), ctx.mine());
    let t0 = get(ctx, mine, "time");
    let sec = get(ctx, mine, "sec");
    let t1 = get(ctx, what, "time");
    let op = get(ctx, what, "op");

    if op.atom_p() {
        if ctx.atom_name(op) == Some("stop") {
            log::debug!("ticker stopped");
            ctx.become_(sink_beh, NIL);
        } else {
            log::warn!("ticker got unknown op {}", ctx.show(op));
        }
        return;
    }

    if t0 != t1 {
        if sec.actor_p() {
            let me = ctx.this();
            let msg = put(ctx, NIL, "from", me);
            let msg = put(ctx, msg, "time", t1);
            ctx.send(sec, msg);
        }
        let state = put(ctx, NIL, "sec", sec);
        let state = put(ctx, state, "time", t1);
        let me = ctx.behavior();
        ctx.become_(me, state);
    }

    // the message is reused for the next tick
    let binding = ctx.heap().first(what);
    let now = Ref::number(ctx.now().s);
    ctx.heap().set_rest(binding, now);

    let me = ctx.this();
    ctx.send_after(TICK_PERIOD_US, me, what);
}

/// Starts a ticker that runs for `count` seconds
pub fn start_ticker(cfg: &mut Config, count: i64) -> Ref {
    let (k_count, k_sec, k_time) = (cfg.atom("count"), cfg.atom("sec"), cfg.atom("time"));

    let state = map_put(cfg.heap_mut(), NIL, k_count, Ref::number(count));
    let each = cfg.create_actor(each_second_beh, state);

    let state = map_put(cfg.heap_mut(), NIL, k_sec, each);
    let ticker = cfg.create_actor(ticker_beh, state);

    let now = Ref::number(cfg.now().s);
    let msg = map_put(cfg.heap_mut(), NIL, k_time, now);
    cfg.send(ticker, msg);

    ticker
}

/// Sends two greetings to a new greeter
pub fn say_hello(cfg: &mut Config) -> Ref {
    let (k_text, k_name, k_addr) = (cfg.atom("text"), cfg.atom("name"), cfg.atom("addr"));

    let actor_name = cfg.atom("Actor");
    let state = map_put(cfg.heap_mut(), NIL, k_text, actor_name);
    let greeter = cfg.create_actor(hello_beh, state);

    let world = cfg.atom("World!");
    let msg = map_put(cfg.heap_mut(), NIL, k_name, world);
    cfg.send(greeter, msg);

    let msg = map_put(cfg.heap_mut(), NIL, k_name, Ref::number(42));
    let msg = map_put(cfg.heap_mut(), msg, k_addr, greeter);
    cfg.send(greeter, msg);

    greeter
}

/// Greets, counts down, and ticks for `seconds` seconds
pub fn start_sample(cfg: &mut Config, seconds: i64) {
    say_hello(cfg);

    let countdown = cfg.create_actor(countdown_beh, Ref::number(seconds));
    cfg.send(countdown, NIL);

    start_ticker(cfg, seconds);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::map_get;

    use std::thread;
    use std::time::Duration;

    #[test]
    fn greeting() {
        let mut cfg = Config::new(100);
        say_hello(&mut cfg);

        // two greetings, four printer messages each
        assert_eq!(cfg.run(1000), 1000 - 10);
        assert_eq!(cfg.delivered(), 10);
        assert_eq!(cfg.pending(), 0);
    }

    #[test]
    fn seconds_count_down() {
        let mut cfg = Config::new(100);
        let k_count = cfg.atom("count");
        let each = cfg.create_actor(each_second_beh, NIL);
        let state = map_put(cfg.heap_mut(), NIL, k_count, Ref::number(2));
        let each2 = cfg.create_actor(each_second_beh, state);

        let k_time = cfg.atom("time");
        for s in 0..3 {
            let msg = map_put(cfg.heap_mut(), NIL, k_time, Ref::number(s));
            cfg.send(each2, msg);
        }
        cfg.send(each, NIL);
        cfg.run(100);

        // three ticks and one uncounted, each printed by a new actor
        assert_eq!(cfg.delivered(), 8);

        let sink = cfg.create_actor(sink_beh, NIL);
        let stopped = cfg.heap_mut().behavior(each2);
        let idle = cfg.heap_mut().behavior(sink);
        let counting = cfg.heap_mut().behavior(each);
        assert_eq!(stopped, idle);
        assert_ne!(counting, idle);
        assert_eq!(cfg.heap_mut().state(each2), NIL);
    }

    #[test]
    fn countdown() {
        let mut cfg = Config::new(10);
        let a = cfg.create_actor(countdown_beh, Ref::number(5));
        cfg.send(a, NIL);

        assert_eq!(cfg.run(100), 94);
        assert_eq!(cfg.delivered(), 6);
        assert_eq!(cfg.heap_mut().state(a), NIL);
    }

    #[test]
    fn whole_sample() {
        let mut cfg = Config::new(100);
        start_sample(&mut cfg, 1);

        let mut rounds = 0;
        while cfg.pending() > 0 || cfg.delayed() > 0 {
            assert!(cfg.run(1000) >= 0);
            if cfg.delayed() > 0 {
                thread::sleep(Duration::from_millis(50));
            }
            rounds += 1;
            assert!(rounds < 400, "sample never finished");
        }

        assert_eq!(cfg.stats().pool_used, 0);
        cfg.force_gc();
        assert_eq!(cfg.heap().usage().fresh, 0);
    }

    #[test]
    fn ticker_stops() {
        let mut cfg = Config::new(100);
        let ticker = start_ticker(&mut cfg, 0);

        let mut rounds = 0;
        while cfg.pending() > 0 || cfg.delayed() > 0 {
            assert!(cfg.run(1000) >= 0);
            if cfg.delayed() > 0 {
                thread::sleep(Duration::from_millis(50));
            }
            rounds += 1;
            assert!(rounds < 200, "ticker never stopped");
        }

        assert_eq!(cfg.heap_mut().state(ticker), NIL);
        let k_sec = cfg.atom("sec");
        let st = cfg.heap_mut().state(ticker);
        assert_eq!(map_get(cfg.heap_mut(), st, k_sec), None);
    }
}
