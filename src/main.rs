// Treadle, an actor runtime on a treadmill heap.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Treadle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/main.rs

// The treadle binary: runs the sample actors on a fresh configuration.

// <>

use treadle::{actor::TICK_FREQ, sample, Config};

use std::env;
use std::process;
use std::thread;
use std::time::Duration;

const USAGE: &str = "usage: treadle [-s] [-n SECONDS] [-q CAPACITY] [-b BUDGET] [-g] [-v] [-V]";

struct Opts {
    sample: bool,
    seconds: i64,
    capacity: usize,
    budget: i32,
    gc: bool,
    verbose: bool,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            sample: false,
            seconds: 5,
            capacity: 100,
            budget: 1_000_000,
            gc: false,
            verbose: false,
        }
    }
}

fn usage() -> ! {
    eprintln!("{USAGE}");
    process::exit(2);
}

fn number<T: std::str::FromStr>(flag: &str, arg: Option<String>) -> T {
    match arg.map(|a| a.parse()) {
        Some(Ok(n)) => n,
        _ => {
            eprintln!("{flag} needs a number");
            usage()
        }
    }
}

fn parse_args() -> Opts {
    let mut opts = Opts::default();
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-s" => opts.sample = true,
            "-n" => opts.seconds = number("-n", args.next()),
            "-q" => opts.capacity = number("-q", args.next()),
            "-b" => opts.budget = number("-b", args.next()),
            "-g" => opts.gc = true,
            "-v" => opts.verbose = true,
            "-V" => {
                println!("treadle {}", env!("CARGO_PKG_VERSION"));
                process::exit(0);
            }
            _ => usage(),
        }
    }

    opts
}

fn main() {
    let opts = parse_args();

    let level = if opts.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
        .unwrap();

    let mut cfg = Config::new(opts.capacity);

    if opts.sample {
        sample::start_sample(&mut cfg, opts.seconds);
    }

    loop {
        let left = cfg.run(opts.budget);
        if left < 0 {
            log::warn!(
                "backpressure: {} messages pending (capacity {})",
                cfg.pending(),
                cfg.limit()
            );
            break;
        }

        if cfg.pending() > 0 {
            log::info!("{} messages still pending", cfg.pending());
            continue;
        }

        if cfg.delayed() == 0 {
            break;
        }

        // idle until the next timer; one collection per idle spell
        if opts.gc && !cfg.heap().collecting() {
            cfg.start_gc();
        }
        thread::sleep(Duration::from_micros((TICK_FREQ / 10) as u64));
    }

    cfg.report();
}
