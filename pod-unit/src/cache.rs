use anyhow::{anyhow, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap as Map,
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

use crate::models::ImageId;

const CACHE_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    layers: Map<String, ImageId>,
}

/// Layers produced by earlier builds, keyed by the digest of the directive
/// sequence that produced them.
#[derive(Debug, Default)]
pub struct BuildCache {
    path: Option<PathBuf>,
    layers: Map<String, ImageId>,
    changed: bool,
}

impl BuildCache {
    pub fn in_memory() -> BuildCache {
        Default::default()
    }

    /// Loads the cache stored at `path`. A missing file is an empty cache.
    pub fn load<P: Into<PathBuf>>(path: P) -> Result<BuildCache> {
        let path = path.into();

        let layers = match File::open(&path) {
            Ok(file) => {
                let file: CacheFile = serde_json::from_reader(BufReader::new(file))
                    .map_err(|err| anyhow!("corrupt build cache {:?}: {}", path, err))?;

                if file.version == CACHE_VERSION {
                    file.layers
                } else {
                    info!("discarding build cache {:?} with version {}", path, file.version);
                    Map::new()
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };

        debug!("loaded {} cached layers from {:?}", layers.len(), path);

        Ok(BuildCache {
            path: Some(path),
            layers,
            changed: false,
        })
    }

    pub fn get(&self, key: &str) -> Option<&ImageId> {
        self.layers.get(key)
    }

    pub fn insert(&mut self, key: String, image: ImageId) {
        self.layers.insert(key, image);
        self.changed = true;
    }

    pub fn remove(&mut self, key: &str) {
        if self.layers.remove(key).is_some() {
            self.changed = true;
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Writes the cache back atomically if anything changed.
    pub fn save(&mut self) -> Result<()> {
        let path = match (&self.path, self.changed) {
            (Some(path), true) => path,
            _ => return Ok(()),
        };

        let directory = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(directory)?;

        let mut temp = NamedTempFile::new_in(directory)?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let file = CacheFile {
                version: CACHE_VERSION,
                layers: self.layers.clone(),
            };
            serde_json::to_writer_pretty(&mut writer, &file)?;
            writer.flush()?;
        }
        temp.persist(path)?;

        debug!("saved {} cached layers to {:?}", self.layers.len(), path);
        self.changed = false;

        Ok(())
    }
}
