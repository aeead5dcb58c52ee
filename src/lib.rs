// Treadle, an actor runtime on a treadmill heap.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Treadle is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/lib.rs

// Crate root. Tagged pair cells, the Treadmill collector that owns
// them, and the actor configuration that dispatches messages built
// from them.

// <>

//! Treadle
//!
//! A small actor runtime. Values are one-word tagged references into
//! an arena of pair cells; an incremental Treadmill collector
//! reclaims cells, either all at once or one trace step per message
//! alongside ordinary actor dispatch.

pub mod actor;
pub mod core;
pub mod memmgt;
pub mod sample;
pub mod symtab;
pub mod tag;

pub use actor::{Behavior, Config, Ctx, Stats, TimeVal};
pub use memmgt::{GcList, Heap, Mark, Usage};
pub use tag::{Kind, Ref, Val, FALSE, NIL, TRUE};
