// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Pieces shared by the transceiver daemon and its command-line client.

pub mod logging;

/// The TCP port on which `xcvrd` listens by default.
pub const DEFAULT_XCVRD_PORT: u16 = 12231;

/// Given two lists, return the items found only in the first list and the
/// items found only in the second.
///
/// This is used to work out which listeners need to be started and which
/// need to be shut down after a configuration change.
pub fn purge_common<T>(a: &[T], b: &[T]) -> (Vec<T>, Vec<T>)
where
    T: Clone + PartialEq,
{
    let only_a = a.iter().filter(|x| !b.contains(x)).cloned().collect();
    let only_b = b.iter().filter(|x| !a.contains(x)).cloned().collect();
    (only_a, only_b)
}
