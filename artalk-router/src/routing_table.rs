//! The Routing Table (RTMP): range → best-path map with four-state aging.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::port::Port;
use crate::zone_table::ZoneInformationTable;

/// One entry in a [`RoutingTable`]: the best known path to a network
/// range. Immutable value data; the `port` field is a non-owning
/// reference to the port's stable identity.
#[derive(Clone)]
pub struct RoutingTableEntry {
    pub network_min: u16,
    pub network_max: u16,
    /// Zero means "directly connected via `port`"; `next_network` and
    /// `next_node` are unused in that case.
    pub distance: u8,
    pub port: Arc<dyn Port>,
    pub next_network: u16,
    pub next_node: u8,
}

impl RoutingTableEntry {
    pub fn is_direct(&self) -> bool {
        self.distance == 0
    }
}

impl PartialEq for RoutingTableEntry {
    fn eq(&self, other: &Self) -> bool {
        self.network_min == other.network_min
            && self.network_max == other.network_max
            && self.distance == other.distance
            && Arc::ptr_eq(&self.port, &other.port)
            && self.next_network == other.next_network
            && self.next_node == other.next_node
    }
}

impl Eq for RoutingTableEntry {}

impl fmt::Debug for RoutingTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingTableEntry")
            .field("network_min", &self.network_min)
            .field("network_max", &self.network_max)
            .field("distance", &self.distance)
            .field("next_network", &self.next_network)
            .field("next_node", &self.next_node)
            .finish()
    }
}

/// Aging state of a routing table entry. Entries age one step per
/// [`RoutingTable::age`] tick unless refreshed by [`RoutingTable::consider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AgeState {
    Good,
    Sus,
    Bad,
    Worst,
}

impl AgeState {
    fn is_bad(self) -> bool {
        matches!(self, Self::Bad | Self::Worst)
    }
}

struct Record {
    entry: RoutingTableEntry,
    state: AgeState,
}

struct Inner {
    /// Every network number in a known range maps to that range's
    /// `network_min`, which doubles as the range's identity key (ranges
    /// never overlap, so `network_min` is unique among live ranges).
    entry_by_network: HashMap<u16, u16>,
    records: HashMap<u16, Record>,
}

/// A router's routing table: the map from network range to best path,
/// plus the aging state that drives RTMP's stale-route eviction.
///
/// All mutation and iteration happens behind a single mutex, matching the
/// coarse-lock concurrency model the rest of the router uses; callers that
/// need to call back out (into the zone table) do so after the lock is
/// released.
pub struct RoutingTable {
    zone_information_table: Arc<ZoneInformationTable>,
    inner: Mutex<Inner>,
}

impl RoutingTable {
    pub fn new(zone_information_table: Arc<ZoneInformationTable>) -> Self {
        Self {
            zone_information_table,
            inner: Mutex::new(Inner {
                entry_by_network: HashMap::new(),
                records: HashMap::new(),
            }),
        }
    }

    /// Look up the entry covering `network`. The second element is `true`
    /// iff the entry's state is BAD or WORST.
    pub fn get_by_network(&self, network: u16) -> (Option<RoutingTableEntry>, bool) {
        let inner = self.inner.lock().unwrap();
        let Some(&range_min) = inner.entry_by_network.get(&network) else {
            return (None, false);
        };
        let record = inner.records.get(&range_min).expect("dangling range key");
        (Some(record.entry.clone()), record.state.is_bad())
    }

    /// Find the unique entry covering `[network_min, network_max]` and, if
    /// it isn't already WORST, mark it BAD. Returns whether such an entry
    /// existed.
    pub fn mark_bad(&self, network_min: u16, network_max: u16) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(range_min) = unique_covering_range(&inner.entry_by_network, network_min, network_max) else {
            return false;
        };
        let Some(record) = inner.records.get_mut(&range_min) else {
            return false;
        };
        if record.state != AgeState::Worst {
            record.state = AgeState::Bad;
        }
        true
    }

    /// Consider `candidate` for insertion, per the overlap-rejection and
    /// distance-vector replacement policy. Returns whether it was
    /// accepted.
    pub fn consider(&self, candidate: RoutingTableEntry) -> bool {
        let mut inner = self.inner.lock().unwrap();

        let overlapping = overlapping_ranges(&inner.entry_by_network, candidate.network_min, candidate.network_max);

        let existing = match overlapping.as_slice() {
            [] => None,
            [range_min] => {
                let record = inner.records.get(range_min).expect("dangling range key");
                if record.entry.network_min != candidate.network_min || record.entry.network_max != candidate.network_max {
                    // a single entry intersects but its range isn't identical: partial overlap, reject
                    return false;
                }
                Some(*range_min)
            }
            _ => return false, // more than one distinct entry intersects: overlap, reject
        };

        let accept = match existing {
            None => true,
            Some(range_min) => {
                let record = &inner.records[&range_min];
                let same_route = record.entry.next_network == candidate.next_network
                    && record.entry.next_node == candidate.next_node
                    && Arc::ptr_eq(&record.entry.port, &candidate.port);
                record.entry.distance >= candidate.distance || record.state.is_bad() || same_route
            }
        };

        if !accept {
            return false;
        }

        if let Some(range_min) = existing {
            inner.records.remove(&range_min);
        }
        let network_min = candidate.network_min;
        let network_max = candidate.network_max;
        inner.records.insert(
            network_min,
            Record {
                entry: candidate,
                state: AgeState::Good,
            },
        );
        for network in network_min..=network_max {
            inner.entry_by_network.insert(network, network_min);
        }
        true
    }

    /// Advance every entry's aging state by one tick. Directly-connected
    /// entries are exempt from decay. Ranges whose entry is evicted this
    /// tick are reported to the zone information table, one
    /// `remove_networks` call per evicted range.
    pub fn age(&self) {
        let removed_ranges = {
            let mut inner = self.inner.lock().unwrap();
            let mut removed = Vec::new();
            let range_mins: Vec<u16> = inner.records.keys().copied().collect();
            for range_min in range_mins {
                let record = inner.records.get_mut(&range_min).unwrap();
                match record.state {
                    AgeState::Worst => {
                        removed.push((record.entry.network_min, record.entry.network_max));
                    }
                    AgeState::Bad => record.state = AgeState::Worst,
                    AgeState::Sus => record.state = AgeState::Bad,
                    AgeState::Good if !record.entry.is_direct() => record.state = AgeState::Sus,
                    AgeState::Good => {}
                }
            }
            for &(network_min, network_max) in &removed {
                inner.records.remove(&network_min);
                for network in network_min..=network_max {
                    inner.entry_by_network.remove(&network);
                }
            }
            removed
        };

        for (network_min, network_max) in removed_ranges {
            if let Err(e) = self
                .zone_information_table
                .remove_networks(network_min, Some(network_max))
            {
                log::debug!("routing table age: zone table had nothing for {network_min}-{network_max}: {e}");
            }
        }
    }

    /// Snapshot every entry along with its badness flag.
    pub fn entries(&self) -> Vec<(RoutingTableEntry, bool)> {
        let inner = self.inner.lock().unwrap();
        inner
            .records
            .values()
            .map(|record| (record.entry.clone(), record.state.is_bad()))
            .collect()
    }

    /// Replace all directly-connected entries for `port` with a fresh
    /// distance-0 entry spanning `[network_min, network_max]`.
    pub fn set_port_range(&self, port: &Arc<dyn Port>, network_min: u16, network_max: u16) {
        let removed_ranges = {
            let mut inner = self.inner.lock().unwrap();
            let stale: Vec<u16> = inner
                .records
                .iter()
                .filter(|(_, record)| record.entry.is_direct() && Arc::ptr_eq(&record.entry.port, port))
                .map(|(range_min, _)| *range_min)
                .collect();

            let mut removed = Vec::new();
            for range_min in stale {
                if let Some(record) = inner.records.remove(&range_min) {
                    removed.push((record.entry.network_min, record.entry.network_max));
                    for network in record.entry.network_min..=record.entry.network_max {
                        inner.entry_by_network.remove(&network);
                    }
                }
            }

            let entry = RoutingTableEntry {
                network_min,
                network_max,
                distance: 0,
                port: port.clone(),
                next_network: 0,
                next_node: 0,
            };
            inner.records.insert(
                network_min,
                Record {
                    entry,
                    state: AgeState::Good,
                },
            );
            for network in network_min..=network_max {
                inner.entry_by_network.insert(network, network_min);
            }

            removed
        };

        for (removed_min, removed_max) in removed_ranges {
            if let Err(e) = self
                .zone_information_table
                .remove_networks(removed_min, Some(removed_max))
            {
                log::debug!("set_port_range: zone table had nothing for {removed_min}-{removed_max}: {e}");
            }
        }
    }
}

fn unique_covering_range(entry_by_network: &HashMap<u16, u16>, network_min: u16, network_max: u16) -> Option<u16> {
    let mut found = None;
    for network in network_min..=network_max {
        match entry_by_network.get(&network) {
            None => return None,
            Some(&range_min) => match found {
                None => found = Some(range_min),
                Some(existing) if existing == range_min => {}
                Some(_) => return None,
            },
        }
    }
    found
}

fn overlapping_ranges(entry_by_network: &HashMap<u16, u16>, network_min: u16, network_max: u16) -> Vec<u16> {
    let mut seen = Vec::new();
    for network in network_min..=network_max {
        if let Some(&range_min) = entry_by_network.get(&network) {
            if !seen.contains(&range_min) {
                seen.push(range_min);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryPort;

    fn port(name: &str) -> Arc<dyn Port> {
        Arc::new(MemoryPort::new(name, true))
    }

    fn zit() -> Arc<ZoneInformationTable> {
        Arc::new(ZoneInformationTable::new())
    }

    fn direct_entry(p: &Arc<dyn Port>, min: u16, max: u16) -> RoutingTableEntry {
        RoutingTableEntry {
            network_min: min,
            network_max: max,
            distance: 0,
            port: p.clone(),
            next_network: 0,
            next_node: 0,
        }
    }

    #[test]
    fn consider_accepts_into_empty_table() {
        let rt = RoutingTable::new(zit());
        let p = port("a");
        let e = RoutingTableEntry {
            network_min: 200,
            network_max: 210,
            distance: 2,
            port: p.clone(),
            next_network: 100,
            next_node: 1,
        };
        assert!(rt.consider(e.clone()));
        let (found, is_bad) = rt.get_by_network(205);
        assert_eq!(found, Some(e));
        assert!(!is_bad);
    }

    #[test]
    fn consider_rejects_overlap() {
        let rt = RoutingTable::new(zit());
        let p = port("a");
        assert!(rt.consider(RoutingTableEntry {
            network_min: 100,
            network_max: 200,
            distance: 1,
            port: p.clone(),
            next_network: 1,
            next_node: 1,
        }));
        // partially overlapping, non-identical range: reject
        assert!(!rt.consider(RoutingTableEntry {
            network_min: 150,
            network_max: 160,
            distance: 1,
            port: p.clone(),
            next_network: 1,
            next_node: 1,
        }));
    }

    #[test]
    fn consider_replaces_farther_route() {
        let rt = RoutingTable::new(zit());
        let p1 = port("a");
        let p2 = port("b");
        assert!(rt.consider(RoutingTableEntry {
            network_min: 10,
            network_max: 10,
            distance: 3,
            port: p1.clone(),
            next_network: 1,
            next_node: 1,
        }));
        assert!(rt.consider(RoutingTableEntry {
            network_min: 10,
            network_max: 10,
            distance: 1,
            port: p2.clone(),
            next_network: 2,
            next_node: 2,
        }));
        let (found, _) = rt.get_by_network(10);
        assert_eq!(found.unwrap().distance, 1);
    }

    #[test]
    fn consider_rejects_worse_route_over_good() {
        let rt = RoutingTable::new(zit());
        let p1 = port("a");
        let p2 = port("b");
        assert!(rt.consider(RoutingTableEntry {
            network_min: 10,
            network_max: 10,
            distance: 1,
            port: p1.clone(),
            next_network: 1,
            next_node: 1,
        }));
        assert!(!rt.consider(RoutingTableEntry {
            network_min: 10,
            network_max: 10,
            distance: 3,
            port: p2.clone(),
            next_network: 2,
            next_node: 2,
        }));
        let (found, _) = rt.get_by_network(10);
        assert_eq!(found.unwrap().distance, 1);
    }

    #[test]
    fn four_ages_with_no_refresh_remove_entry() {
        let rt = RoutingTable::new(zit());
        let p = port("a");
        rt.consider(RoutingTableEntry {
            network_min: 200,
            network_max: 210,
            distance: 2,
            port: p.clone(),
            next_network: 100,
            next_node: 1,
        });
        for _ in 0..3 {
            rt.age();
            assert!(rt.get_by_network(200).0.is_some());
        }
        rt.age();
        assert!(rt.get_by_network(200).0.is_none());
    }

    #[test]
    fn direct_entry_survives_any_number_of_ages() {
        let rt = RoutingTable::new(zit());
        let p = port("a");
        rt.set_port_range(&p, 50, 60);
        for _ in 0..100 {
            rt.age();
        }
        assert!(rt.get_by_network(55).0.is_some());
    }

    #[test]
    fn set_port_range_replaces_previous_direct_entry() {
        let rt = RoutingTable::new(zit());
        let p = port("a");
        rt.set_port_range(&p, 50, 60);
        rt.set_port_range(&p, 70, 80);
        assert!(rt.get_by_network(55).0.is_none());
        assert!(rt.get_by_network(75).0.is_some());
    }

    #[test]
    fn consider_resets_state_to_good() {
        let rt = RoutingTable::new(zit());
        let p = port("a");
        let e = direct_entry(&p, 10, 10);
        // use a non-direct entry so it is actually subject to aging
        let e = RoutingTableEntry { distance: 1, ..e };
        rt.consider(e.clone());
        rt.age();
        rt.age();
        assert!(rt.get_by_network(10).1); // BAD by now
        assert!(rt.consider(e));
        assert!(!rt.get_by_network(10).1); // GOOD again
    }
}
