// THEORY:
// The `fusion_engine` module is the heart of the fusion layer. It answers one
// question for every incoming observation: which tracked object is this sensor
// talking about? This is the data association problem, solved here one
// observation at a time rather than one frame at a time.
//
// Key architectural principles:
// 1.  **First Match, Not Nearest Match**: Live clusters are scanned in id order
//     (oldest first) and the observation joins the first cluster whose consensus
//     lies within the association radius. When radii overlap, an older cluster
//     wins over a closer younger one. This is deliberate and kept simple.
// 2.  **Wraparound Awareness**: Distances are measured on the torus, so an object
//     sitting on a world edge keeps a single cluster instead of splitting in two.
// 3.  **Lifecycle Management**:
//     - **Birth**: An observation that matches nothing opens a new cluster.
//     - **Tracking**: A match folds the observation into the cluster.
//     - **Expiry**: `cleanup` drops clusters with no recent observation.
// 4.  **Plain Ownership**: The engine holds no lock of its own. The coordinator
//     owns it behind a single reader/writer lock, which makes every call to
//     `process_observation` atomic end to end.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::core_modules::cluster::{ClusterId, ConfirmedThreat, TrackedCluster};
use crate::core_modules::observation::Observation;
use crate::core_modules::world::WorldBounds;

/// Maintains the set of live clusters and associates observations with them.
#[derive(Debug)]
pub struct FusionEngine {
    cluster_radius: f64,
    min_sensors: usize,
    expiration: Duration,
    world: WorldBounds,
    /// Ordered by id, which fixes the first-match scan order.
    clusters: BTreeMap<ClusterId, TrackedCluster>,
    next_id: ClusterId,
}

impl FusionEngine {
    pub fn new(cluster_radius: f64, min_sensors: usize, expiration: Duration, world: WorldBounds) -> Self {
        Self {
            cluster_radius,
            min_sensors,
            expiration,
            world,
            clusters: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Associates an observation with a cluster, opening one if nothing is in
    /// range. Returns the cluster's view whenever it is confirmed, which means
    /// on every qualifying update and not only the first.
    pub fn process_observation(&mut self, observation: Observation, now: Instant) -> Option<ConfirmedThreat> {
        let id = match self.first_match(observation.position()) {
            Some(id) => {
                if let Some(cluster) = self.clusters.get_mut(&id) {
                    cluster.absorb(observation, &self.world, now);
                }
                id
            }
            None => self.open_cluster(observation, now),
        };

        let cluster = self.clusters.get_mut(&id)?;
        if cluster.check_confirmation(self.min_sensors) {
            debug!(
                cluster_id = cluster.id,
                sensors = cluster.sensor_count,
                "cluster confirmed"
            );
        }
        cluster.confirmed.then(|| cluster.to_view())
    }

    fn first_match(&self, position: (f64, f64)) -> Option<ClusterId> {
        self.clusters
            .values()
            .find(|cluster| self.world.wrapped_distance(position, cluster.position()) <= self.cluster_radius)
            .map(|cluster| cluster.id)
    }

    fn open_cluster(&mut self, observation: Observation, now: Instant) -> ClusterId {
        let id = self.next_id;
        self.next_id += 1;
        debug!(cluster_id = id, x = observation.x, y = observation.y, "opened cluster");
        self.clusters.insert(id, TrackedCluster::new(id, observation, &self.world, now));
        id
    }

    /// A copy of every confirmed cluster.
    pub fn confirmed_clusters(&self) -> Vec<ConfirmedThreat> {
        self.clusters
            .values()
            .filter(|cluster| cluster.confirmed)
            .map(TrackedCluster::to_view)
            .collect()
    }

    /// Removes every cluster not updated within the staleness window and
    /// returns the ids it removed.
    pub fn cleanup(&mut self, now: Instant) -> Vec<ClusterId> {
        let expiration = self.expiration;
        let mut removed = Vec::new();
        self.clusters.retain(|id, cluster| {
            let keep = !cluster.is_stale(now, expiration);
            if !keep {
                removed.push(*id);
            }
            keep
        });
        removed
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&TrackedCluster> {
        self.clusters.get(&id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &TrackedCluster> {
        self.clusters.values()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
