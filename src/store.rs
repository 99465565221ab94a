//! Process-wide cache of meshed areas and their attached weather. Values are
//! frozen behind `Arc` on publication; readers share freely. The store is
//! always passed explicitly to the pipeline entry points so tests can inject
//! an empty instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::RouteError;
use crate::mesh::MeshedArea;
use crate::models::{MeshedAreaId, Version};
use crate::weather::WeatheredMesh;

pub trait MeshStore: Send + Sync {
    /// Publishes a meshed area under a freshly minted id.
    fn put(&self, area: MeshedArea) -> MeshedAreaId;
    fn get(&self, id: MeshedAreaId) -> Option<Arc<MeshedArea>>;
    /// Attaches (or replaces) the weather for an area, bumping its version.
    fn attach_weather(
        &self,
        id: MeshedAreaId,
        weather: WeatheredMesh,
    ) -> Result<Version, RouteError>;
    fn get_weather(&self, id: MeshedAreaId) -> Option<Arc<WeatheredMesh>>;
}

#[derive(Default)]
pub struct InMemoryMeshStore {
    next_id: AtomicU64,
    areas: RwLock<HashMap<MeshedAreaId, Arc<MeshedArea>>>,
    weather: RwLock<HashMap<MeshedAreaId, Arc<WeatheredMesh>>>,
    versions: RwLock<HashMap<MeshedAreaId, u64>>,
}

impl InMemoryMeshStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MeshStore for InMemoryMeshStore {
    fn put(&self, mut area: MeshedArea) -> MeshedAreaId {
        let id = MeshedAreaId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        area.id = id;
        self.areas
            .write()
            .expect("mesh store lock poisoned")
            .insert(id, Arc::new(area));
        id
    }

    fn get(&self, id: MeshedAreaId) -> Option<Arc<MeshedArea>> {
        self.areas
            .read()
            .expect("mesh store lock poisoned")
            .get(&id)
            .cloned()
    }

    fn attach_weather(
        &self,
        id: MeshedAreaId,
        mut weather: WeatheredMesh,
    ) -> Result<Version, RouteError> {
        if self.get(id).is_none() {
            return Err(RouteError::NotFound(id));
        }
        let mut versions = self.versions.write().expect("mesh store lock poisoned");
        let counter = versions.entry(id).or_insert(0);
        *counter += 1;
        let version = Version(*counter);
        weather.version = version;
        self.weather
            .write()
            .expect("mesh store lock poisoned")
            .insert(id, Arc::new(weather));
        Ok(version)
    }

    fn get_weather(&self, id: MeshedAreaId) -> Option<Arc<WeatheredMesh>> {
        self.weather
            .read()
            .expect("mesh store lock poisoned")
            .get(&id)
            .cloned()
    }
}
