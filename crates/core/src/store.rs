//! Scene storage seam.
//!
//! Broadcast commands and the session orchestrator only talk to
//! [`SceneStore`], so the backing collection can be swapped without
//! touching either.

use crate::scene::SceneRecord;
use crate::types::SceneId;

/// Ordered collection of the scenes in the active episode.
pub trait SceneStore: Send + Sync {
    /// Number of scenes tracked.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scene ids in episode order.
    fn ids(&self) -> Vec<SceneId>;

    fn get(&self, id: &str) -> Option<&SceneRecord>;

    fn get_mut(&mut self, id: &str) -> Option<&mut SceneRecord>;

    /// Insert a scene, replacing any scene with the same id in place.
    fn upsert(&mut self, scene: SceneRecord);

    /// Replace the whole scene set.
    fn replace_all(&mut self, scenes: Vec<SceneRecord>);

    /// Clone of every scene, in episode order.
    fn snapshot(&self) -> Vec<SceneRecord>;

    /// Visit every scene mutably, in episode order.
    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut SceneRecord));
}

/// [`SceneStore`] backed by a `Vec`, preserving insertion order.
#[derive(Debug, Default, Clone)]
pub struct InMemorySceneStore {
    scenes: Vec<SceneRecord>,
}

impl InMemorySceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scenes(scenes: Vec<SceneRecord>) -> Self {
        let mut store = Self::new();
        store.replace_all(scenes);
        store
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.scenes.iter().position(|s| s.id == id)
    }
}

impl SceneStore for InMemorySceneStore {
    fn len(&self) -> usize {
        self.scenes.len()
    }

    fn ids(&self) -> Vec<SceneId> {
        self.scenes.iter().map(|s| s.id.clone()).collect()
    }

    fn get(&self, id: &str) -> Option<&SceneRecord> {
        self.position(id).map(|i| &self.scenes[i])
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut SceneRecord> {
        self.position(id).map(move |i| &mut self.scenes[i])
    }

    fn upsert(&mut self, scene: SceneRecord) {
        match self.position(&scene.id) {
            Some(i) => self.scenes[i] = scene,
            None => self.scenes.push(scene),
        }
    }

    fn replace_all(&mut self, scenes: Vec<SceneRecord>) {
        self.scenes.clear();
        // Later duplicates win, keeping the first position.
        for scene in scenes {
            self.upsert(scene);
        }
    }

    fn snapshot(&self) -> Vec<SceneRecord> {
        self.scenes.clone()
    }

    fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut SceneRecord)) {
        for scene in &mut self.scenes {
            f(scene);
        }
    }
}
