use std::collections::BTreeMap;
use std::collections::HashMap;

use super::ServerBalanceInfo;
use crate::constants::DEFAULT_LOCATION;

type CityMap = BTreeMap<String, Vec<ServerBalanceInfo>>;
type ZoneMap = HashMap<String, CityMap>;

/// Servers grouped cluster → zone → city, each city list sorted by
/// descending load weight.
#[derive(Debug, Clone, Default)]
pub struct ClusterLoadTree {
    clusters: HashMap<String, ZoneMap>,
    servers: usize,
}

impl ClusterLoadTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(servers: impl IntoIterator<Item = ServerBalanceInfo>) -> Self {
        let mut tree = Self::new();
        for server in servers {
            tree.insert(server);
        }
        tree
    }

    /// Adds `server`, replacing an existing entry with the same identity.
    pub fn insert(
        &mut self,
        server: ServerBalanceInfo,
    ) {
        let list = self
            .clusters
            .entry(server.cluster_name.clone())
            .or_default()
            .entry(server.zone_id.clone())
            .or_default()
            .entry(server.city_id.clone())
            .or_default();

        match list.iter().position(|s| s.same_identity(&server)) {
            Some(idx) => list[idx] = server,
            None => {
                list.push(server);
                self.servers += 1;
            }
        }
        list.sort_by(|a, b| {
            b.load_weight
                .total_cmp(&a.load_weight)
                .then_with(|| a.node_ip.cmp(&b.node_ip))
        });
    }

    /// Best candidates for a client location.
    ///
    /// Tries the requested cluster then `default`, within it the requested
    /// zone then `default`, within that the requested city then every other
    /// city. The first non-empty city list wins.
    pub fn lookup(
        &self,
        cluster_name: &str,
        zone_id: &str,
        city_id: &str,
    ) -> Option<&[ServerBalanceInfo]> {
        for cluster in preference(cluster_name) {
            let Some(zones) = self.clusters.get(cluster) else {
                continue;
            };
            for zone in preference(zone_id) {
                let Some(cities) = zones.get(zone) else {
                    continue;
                };
                if let Some(list) = cities.get(city_id).filter(|l| !l.is_empty()) {
                    return Some(list);
                }
                if let Some(list) = cities.values().find(|l| !l.is_empty()) {
                    return Some(list);
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers == 0
    }
}

fn preference(requested: &str) -> impl Iterator<Item = &str> {
    let fallback: Option<&str> = (requested != DEFAULT_LOCATION).then_some(DEFAULT_LOCATION);
    std::iter::once(requested).chain(fallback)
}
