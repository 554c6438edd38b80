//! Per-switch learned station table, mapping a source address seen at a
//! switch to the port it arrived on.

use std::collections::HashMap;

use crate::openflow0x01::DatapathId;
use crate::packet::MacAddr;

/// Which hosts are known to live behind which ports, per switch. Entries are
/// only ever observations of real traffic; two switches never share entries.
#[derive(Debug, Default)]
pub struct ForwardingTable {
    known_hosts: HashMap<(DatapathId, MacAddr), u16>,
}

impl ForwardingTable {
    pub fn new() -> ForwardingTable {
        ForwardingTable::default()
    }

    /// Record that `host` was seen entering `switch` on `port`. A later
    /// observation of the same host replaces the port.
    pub fn learn(&mut self, switch: DatapathId, host: MacAddr, port: u16) {
        self.known_hosts.insert((switch, host), port);
    }

    /// The port `host` is reachable on at `switch`, if it has been learned.
    pub fn lookup(&self, switch: DatapathId, host: MacAddr) -> Option<u16> {
        self.known_hosts.get(&(switch, host)).copied()
    }

    /// Drop everything learned for one switch, returning how many hosts were
    /// forgotten. Other switches' entries are untouched.
    pub fn forget_switch(&mut self, switch: DatapathId) -> usize {
        let before = self.known_hosts.len();
        self.known_hosts.retain(|(sw, _), _| *sw != switch);
        before - self.known_hosts.len()
    }

    /// Number of learned entries across all switches.
    pub fn len(&self) -> usize {
        self.known_hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known_hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ForwardingTable;
    use crate::packet::MacAddr;

    const HOST_A: MacAddr = MacAddr([0xaa, 0, 0, 0, 0, 1]);
    const HOST_B: MacAddr = MacAddr([0xbb, 0, 0, 0, 0, 2]);

    #[test]
    fn lookup_unknown_host() {
        let table = ForwardingTable::new();
        assert_eq!(table.lookup(1, HOST_A), None);
    }

    #[test]
    fn relearning_same_port_is_idempotent() {
        let mut table = ForwardingTable::new();
        table.learn(1, HOST_A, 3);
        table.learn(1, HOST_A, 3);
        assert_eq!(table.lookup(1, HOST_A), Some(3));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn host_move_replaces_port() {
        let mut table = ForwardingTable::new();
        table.learn(1, HOST_A, 3);
        table.learn(1, HOST_A, 5);
        assert_eq!(table.lookup(1, HOST_A), Some(5));
    }

    #[test]
    fn switches_learn_independently() {
        let mut table = ForwardingTable::new();
        table.learn(1, HOST_A, 3);
        table.learn(2, HOST_A, 7);
        table.learn(1, HOST_B, 4);
        assert_eq!(table.lookup(1, HOST_A), Some(3));
        assert_eq!(table.lookup(2, HOST_A), Some(7));
        assert_eq!(table.lookup(2, HOST_B), None);
    }

    #[test]
    fn forgetting_a_switch_spares_the_others() {
        let mut table = ForwardingTable::new();
        table.learn(1, HOST_A, 3);
        table.learn(1, HOST_B, 4);
        table.learn(2, HOST_A, 7);
        assert_eq!(table.forget_switch(1), 2);
        assert_eq!(table.lookup(1, HOST_A), None);
        assert_eq!(table.lookup(2, HOST_A), Some(7));
        assert_eq!(table.forget_switch(1), 0);
    }
}
