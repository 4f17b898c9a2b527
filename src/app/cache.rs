//! Per-channel bookkeeping owned by [`Controls`](super::controls::Controls).
//!
//! - [`RecurringCommandCache`]: vial → standing program, per channel.
//!   Restores standing programs after a lock/unlock cycle.
//! - [`PausedDilutionBacklog`]: vial → accumulated one-shot seconds, per
//!   channel, collected while locked and flushed on unlock.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::rpc::command::{PUMP_CHANNELS, PumpChannel, PumpCommandVector, PumpValue};

/// A standing pump program: `secs` on every `period` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecurringProgram {
    pub secs: f64,
    pub period: f64,
}

impl RecurringProgram {
    pub fn value(self) -> PumpValue {
        PumpValue::Recurring {
            secs: self.secs,
            period: self.period,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// RecurringCommandCache
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecurringCommandCache {
    channels: [BTreeMap<usize, RecurringProgram>; 3],
}

impl RecurringCommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vial: usize, channel: PumpChannel, program: RecurringProgram) {
        self.channels[channel.index()].insert(vial, program);
    }

    pub fn remove(&mut self, vial: usize, channel: PumpChannel) -> Option<RecurringProgram> {
        self.channels[channel.index()].remove(&vial)
    }

    /// Drop every channel of `vial`.
    pub fn remove_vial(&mut self, vial: usize) {
        for map in &mut self.channels {
            map.remove(&vial);
        }
    }

    pub fn get(&self, vial: usize, channel: PumpChannel) -> Option<RecurringProgram> {
        self.channels[channel.index()].get(&vial).copied()
    }

    pub fn contains(&self, vial: usize, channel: PumpChannel) -> bool {
        self.channels[channel.index()].contains_key(&vial)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(BTreeMap::is_empty)
    }

    pub fn len(&self) -> usize {
        self.channels.iter().map(BTreeMap::len).sum()
    }

    pub fn clear(&mut self) {
        for map in &mut self.channels {
            map.clear();
        }
    }

    /// Every entry as `(vial, channel, program)`, channel-major.
    pub fn iter(&self) -> impl Iterator<Item = (usize, PumpChannel, RecurringProgram)> + '_ {
        PUMP_CHANNELS
            .iter()
            .flat_map(move |&ch| self.channels[ch.index()].iter().map(move |(&v, &p)| (v, ch, p)))
    }

    /// Vials with at least one standing program.
    pub fn vials(&self) -> Vec<usize> {
        let mut vials: Vec<usize> = self.iter().map(|(v, _, _)| v).collect();
        vials.sort_unstable();
        vials.dedup();
        vials
    }

    /// All programs as one recurring pump vector.
    pub fn to_vector(&self, num_vials: usize) -> Result<PumpCommandVector> {
        let mut v = PumpCommandVector::new(num_vials);
        for (vial, ch, p) in self.iter() {
            v.set(vial, ch, p.value())?;
        }
        Ok(v)
    }
}

// ───────────────────────────────────────────────────────────────
// PausedDilutionBacklog
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PausedDilutionBacklog {
    channels: [BTreeMap<usize, f64>; 3],
}

impl PausedDilutionBacklog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate `secs` onto the pending value for (vial, channel).
    pub fn add(&mut self, vial: usize, channel: PumpChannel, secs: f64) {
        *self.channels[channel.index()].entry(vial).or_insert(0.0) += secs;
    }

    pub fn get(&self, vial: usize, channel: PumpChannel) -> Option<f64> {
        self.channels[channel.index()].get(&vial).copied()
    }

    pub fn remove(&mut self, vial: usize, channel: PumpChannel) -> Option<f64> {
        self.channels[channel.index()].remove(&vial)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(BTreeMap::is_empty)
    }

    pub fn clear(&mut self) {
        for map in &mut self.channels {
            map.clear();
        }
    }

    /// Every entry as `(vial, channel, seconds)`, channel-major.
    pub fn iter(&self) -> impl Iterator<Item = (usize, PumpChannel, f64)> + '_ {
        PUMP_CHANNELS
            .iter()
            .flat_map(move |&ch| self.channels[ch.index()].iter().map(move |(&v, &s)| (v, ch, s)))
    }
}
