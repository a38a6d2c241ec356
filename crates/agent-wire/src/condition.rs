//! Agent condition bitfield.
//!
//! A plain flag set over three bits, per spec §9's "bitmask condition
//! flags" redesign note. `clear` uses `&= !bit`, never a bitwise
//! complement of the whole value — the source's `Condition = ^X` bug
//! (spec §9) clobbered every other bit; this type makes that mistake
//! unrepresentable.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCondition(u8);

impl AgentCondition {
    pub const INITIALIZED: AgentCondition = AgentCondition(1 << 0);
    pub const READY: AgentCondition = AgentCondition(1 << 1);
    pub const SYNCED: AgentCondition = AgentCondition(1 << 2);

    pub const fn empty() -> Self {
        AgentCondition(0)
    }

    pub fn set(&mut self, bit: AgentCondition) {
        self.0 |= bit.0;
    }

    pub fn clear(&mut self, bit: AgentCondition) {
        self.0 &= !bit.0;
    }

    pub fn has(&self, bit: AgentCondition) -> bool {
        self.0 & bit.0 != 0
    }

    pub fn is_ready(&self) -> bool {
        self.has(Self::INITIALIZED) && self.has(Self::READY)
    }

    /// Pure formatter for logs, e.g. "INITIALIZED|READY".
    pub fn status_string(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if self.has(Self::INITIALIZED) {
            parts.push("INITIALIZED");
        }
        if self.has(Self::READY) {
            parts.push("READY");
        }
        if self.has(Self::SYNCED) {
            parts.push("SYNCED");
        }
        if parts.is_empty() {
            "NOT INITIALIZED".to_owned()
        } else {
            parts.join("|")
        }
    }
}

impl Default for AgentCondition {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_only_touches_the_named_bit() {
        let mut c = AgentCondition::empty();
        c.set(AgentCondition::INITIALIZED);
        c.set(AgentCondition::READY);
        c.set(AgentCondition::SYNCED);

        c.clear(AgentCondition::READY);

        assert!(c.has(AgentCondition::INITIALIZED));
        assert!(!c.has(AgentCondition::READY));
        assert!(c.has(AgentCondition::SYNCED));
    }

    #[test]
    fn status_string_lists_set_bits_in_order() {
        let mut c = AgentCondition::empty();
        assert_eq!(c.status_string(), "NOT INITIALIZED");
        c.set(AgentCondition::INITIALIZED);
        assert_eq!(c.status_string(), "INITIALIZED");
        c.set(AgentCondition::SYNCED);
        assert_eq!(c.status_string(), "INITIALIZED|SYNCED");
    }

    #[test]
    fn is_ready_requires_both_initialized_and_ready() {
        let mut c = AgentCondition::empty();
        assert!(!c.is_ready());
        c.set(AgentCondition::INITIALIZED);
        assert!(!c.is_ready());
        c.set(AgentCondition::READY);
        assert!(c.is_ready());
    }
}
