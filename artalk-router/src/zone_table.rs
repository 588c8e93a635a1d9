//! The Zone Information Table (ZIP): range ↔ zone-name bidirectional map.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::ZoneTableError;

/// A zone name is an arbitrary byte string (Mac Roman, not necessarily
/// valid UTF-8); it is compared case-insensitively under the AppleTalk
/// fold table.
pub type ZoneName = Vec<u8>;

struct Inner {
    range_max: HashMap<u16, u16>,
    zones_in_range: HashMap<u16, Vec<ZoneName>>,
    default_zone: HashMap<u16, ZoneName>,
    ranges_for_zone: HashMap<ZoneName, HashSet<u16>>,
    canonical_by_fold: HashMap<Vec<u8>, ZoneName>,
}

/// Maps network ranges to the zone names that cover them and back, with a
/// case-insensitive namespace over zone names.
///
/// All mutation and iteration happens behind a single mutex, matching
/// [`crate::routing_table::RoutingTable`]'s concurrency model.
pub struct ZoneInformationTable {
    inner: Mutex<Inner>,
}

impl Default for ZoneInformationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneInformationTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                range_max: HashMap::new(),
                zones_in_range: HashMap::new(),
                default_zone: HashMap::new(),
                ranges_for_zone: HashMap::new(),
                canonical_by_fold: HashMap::new(),
            }),
        }
    }

    /// Check a `(min, max?)` pair against the table. If `max` is given and
    /// a range already exists at `min` with a different end, or the
    /// proposed range overlaps an unrelated existing one, this is a
    /// conflict. If `max` is omitted, the range at `min` must already
    /// exist. Returns the resolved `max` on success.
    fn check_range(inner: &Inner, network_min: u16, network_max: Option<u16>) -> Result<Option<u16>, ZoneTableError> {
        if let Some(max) = network_max {
            if max < network_min {
                return Err(ZoneTableError::BackwardsRange {
                    network_min,
                    network_max: max,
                });
            }
        }
        match (inner.range_max.get(&network_min).copied(), network_max) {
            (None, None) => Err(ZoneTableError::UnknownRange { network_min }),
            (None, Some(_)) => {
                // check for overlap with any existing range
                for (&existing_min, &existing_max) in &inner.range_max {
                    let max = network_max.unwrap();
                    if existing_min > max || existing_max < network_min {
                        continue;
                    }
                    return Err(ZoneTableError::RangeConflict {
                        network_min,
                        network_max: max,
                        existing_min,
                        existing_max,
                    });
                }
                Ok(None)
            }
            (Some(existing_max), None) => Ok(Some(existing_max)),
            (Some(existing_max), Some(max)) if existing_max == max => Ok(Some(existing_max)),
            (Some(existing_max), Some(max)) => Err(ZoneTableError::RangeConflict {
                network_min,
                network_max: max,
                existing_min: network_min,
                existing_max,
            }),
        }
    }

    /// Add a range of networks to a zone, creating the zone if it isn't in
    /// the table yet. The first zone ever added for a range becomes that
    /// range's default zone. Zone names are folded to a case-insensitive
    /// canonical spelling, preserving the first spelling seen.
    pub fn add_networks_to_zone(
        &self,
        zone_name: &[u8],
        network_min: u16,
        network_max: Option<u16>,
    ) -> Result<(), ZoneTableError> {
        let mut inner = self.inner.lock().unwrap();
        let folded = artalk_ddp::fold(zone_name);

        let canonical = inner
            .canonical_by_fold
            .entry(folded.clone())
            .or_insert_with(|| zone_name.to_vec())
            .clone();
        if !inner.ranges_for_zone.contains_key(&canonical) {
            inner.ranges_for_zone.insert(canonical.clone(), HashSet::new());
        }

        let resolved_max = match Self::check_range(&inner, network_min, network_max) {
            Ok(resolved) => resolved,
            Err(e) => {
                // roll back the zone creation if this was a brand new zone and the range is bad
                if inner.ranges_for_zone.get(&canonical).map(HashSet::is_empty).unwrap_or(false) {
                    inner.ranges_for_zone.remove(&canonical);
                    inner.canonical_by_fold.remove(&folded);
                }
                return Err(e);
            }
        };

        match resolved_max {
            Some(max) => {
                inner
                    .zones_in_range
                    .entry(network_min)
                    .or_default()
                    .push(canonical.clone());
                dedup_last(inner.zones_in_range.get_mut(&network_min).unwrap());
                log::debug!(
                    "zone table: adding network range {network_min}-{max} to zone {:?}",
                    String::from_utf8_lossy(&canonical)
                );
            }
            None => {
                let max = network_max.unwrap();
                inner.range_max.insert(network_min, max);
                inner.zones_in_range.insert(network_min, vec![canonical.clone()]);
                inner.default_zone.insert(network_min, canonical.clone());
                log::debug!(
                    "zone table: adding network range {network_min}-{max} to zone {:?} (now default zone for this range)",
                    String::from_utf8_lossy(&canonical)
                );
            }
        }
        inner.ranges_for_zone.get_mut(&canonical).unwrap().insert(network_min);
        Ok(())
    }

    /// Remove a range of networks from all zones. Any zone left with no
    /// ranges is removed too.
    pub fn remove_networks(&self, network_min: u16, network_max: Option<u16>) -> Result<(), ZoneTableError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(max) = Self::check_range(&inner, network_min, network_max)? else {
            return Ok(());
        };
        log::debug!("zone table: removing network range {network_min}-{max} from all zones");
        let zones = inner.zones_in_range.remove(&network_min).unwrap_or_default();
        for zone in zones {
            if let Some(ranges) = inner.ranges_for_zone.get_mut(&zone) {
                ranges.remove(&network_min);
                if ranges.is_empty() {
                    log::debug!(
                        "zone table: removing zone {:?}, it no longer contains any networks",
                        String::from_utf8_lossy(&zone)
                    );
                    inner.ranges_for_zone.remove(&zone);
                    inner.canonical_by_fold.remove(&artalk_ddp::fold(&zone));
                }
            }
        }
        inner.default_zone.remove(&network_min);
        inner.range_max.remove(&network_min);
        Ok(())
    }

    /// Every canonical zone name currently known.
    pub fn zones(&self) -> Vec<ZoneName> {
        let inner = self.inner.lock().unwrap();
        inner.ranges_for_zone.keys().cloned().collect()
    }

    /// The zones covering `[network_min, network_max?]`, default zone
    /// first. Empty if the range (as given) is not known.
    pub fn zones_in_network_range(&self, network_min: u16, network_max: Option<u16>) -> Vec<ZoneName> {
        let inner = self.inner.lock().unwrap();
        if Self::check_range(&inner, network_min, network_max).is_err() {
            return Vec::new();
        }
        let Some(default_zone) = inner.default_zone.get(&network_min) else {
            return Vec::new();
        };
        let mut out = vec![default_zone.clone()];
        if let Some(zones) = inner.zones_in_range.get(&network_min) {
            for zone in zones {
                if zone != default_zone {
                    out.push(zone.clone());
                }
            }
        }
        out
    }

    /// Every network number belonging to `zone_name`, looked up
    /// case-insensitively.
    pub fn networks_in_zone(&self, zone_name: &[u8]) -> Vec<u16> {
        let inner = self.inner.lock().unwrap();
        let folded = artalk_ddp::fold(zone_name);
        let Some(canonical) = inner.canonical_by_fold.get(&folded) else {
            return Vec::new();
        };
        let Some(ranges) = inner.ranges_for_zone.get(canonical) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for &range_min in ranges {
            if let Some(&range_max) = inner.range_max.get(&range_min) {
                out.extend(range_min..=range_max);
            }
        }
        out
    }
}

fn dedup_last(zones: &mut Vec<ZoneName>) {
    if let Some(last) = zones.pop() {
        if !zones.contains(&last) {
            zones.push(last);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_zone_lookup() {
        let zit = ZoneInformationTable::new();
        zit.add_networks_to_zone(b"Engineering", 10, Some(20)).unwrap();
        assert_eq!(zit.networks_in_zone(b"ENGINEERING"), (10..=20).collect::<Vec<_>>());
        zit.add_networks_to_zone(b"ENGINEERING", 30, Some(40)).unwrap();
        let mut networks = zit.networks_in_zone(b"engineering");
        networks.sort_unstable();
        let mut expected: Vec<u16> = (10..=20).collect();
        expected.extend(30..=40);
        expected.sort_unstable();
        assert_eq!(networks, expected);
        assert_eq!(zit.zones(), vec![b"Engineering".to_vec()]);
    }

    #[test]
    fn default_zone_is_first_added() {
        let zit = ZoneInformationTable::new();
        zit.add_networks_to_zone(b"Sales", 1, Some(5)).unwrap();
        zit.add_networks_to_zone(b"Marketing", 1, None).unwrap();
        let zones = zit.zones_in_network_range(1, None);
        assert_eq!(zones[0], b"Sales".to_vec());
        assert!(zones.contains(&b"Marketing".to_vec()));
    }

    #[test]
    fn overlapping_range_is_rejected() {
        let zit = ZoneInformationTable::new();
        zit.add_networks_to_zone(b"Sales", 1, Some(10)).unwrap();
        let err = zit.add_networks_to_zone(b"Other", 5, Some(15)).unwrap_err();
        assert!(matches!(err, ZoneTableError::RangeConflict { .. }));
    }

    #[test]
    fn remove_last_range_removes_zone() {
        let zit = ZoneInformationTable::new();
        zit.add_networks_to_zone(b"Sales", 1, Some(10)).unwrap();
        zit.remove_networks(1, Some(10)).unwrap();
        assert!(!zit.zones().contains(&b"Sales".to_vec()));
        assert!(zit.zones_in_network_range(1, None).is_empty());
    }

    #[test]
    fn remove_networks_requires_known_range_when_max_omitted() {
        let zit = ZoneInformationTable::new();
        assert!(matches!(
            zit.remove_networks(99, None),
            Err(ZoneTableError::UnknownRange { network_min: 99 })
        ));
    }
}
