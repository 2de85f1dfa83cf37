// SPDX-License-Identifier: Apache-2.0

mod sincedb;

pub use sincedb::{FlushStatus, SinceDb, parse_line};
