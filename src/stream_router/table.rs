use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use super::RouterError;

/// One path of the router's declarative table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathEntry {
    pub source: String,
    pub source_on_demand: bool,
    pub source_protocol: String,
    pub source_on_demand_close_after: String,
}

impl PathEntry {
    /// On-demand TCP pull from a node's RTSP server, closed after 5s idle.
    pub fn rtsp_pull(address: &str, port: u16, stream_id: &str) -> Self {
        Self {
            source: format!("rtsp://{}:{}/{}", address, port, stream_id),
            source_on_demand: true,
            source_protocol: "tcp".to_string(),
            source_on_demand_close_after: "5s".to_string(),
        }
    }
}

/// A requested stream: the path id and where the router should pull it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub stream_id: String,
    pub address: String,
    pub port: u16,
}

impl StreamTarget {
    pub fn entry(&self) -> PathEntry {
        PathEntry::rtsp_pull(&self.address, self.port, &self.stream_id)
    }
}

/// Whole router configuration document. Keys other than `paths`, and path
/// entries this crate did not write, are carried through untouched.
#[derive(Debug, Clone, Default)]
pub struct PathTable {
    root: Mapping,
}

const PATHS: &str = "paths";

impl PathTable {
    pub fn parse(text: &str) -> Result<Self, RouterError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        match serde_yaml::from_str::<Value>(text)? {
            Value::Mapping(root) => Ok(Self { root }),
            Value::Null => Ok(Self::default()),
            _ => Err(RouterError::InvalidTable(
                "top level is not a mapping".to_string(),
            )),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, RouterError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| RouterError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&text)
    }

    /// Writes the whole document next to `path` and renames it into place,
    /// so readers never observe a half-written table.
    pub async fn save(&self, path: &Path) -> Result<(), RouterError> {
        let text = serde_yaml::to_string(&Value::Mapping(self.root.clone()))?;
        let tmp = temp_path(path);
        let io_err = |source| RouterError::Io {
            path: path.to_path_buf(),
            source,
        };
        tokio::fs::write(&tmp, text).await.map_err(io_err)?;
        if let Err(source) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(source));
        }
        Ok(())
    }

    fn paths(&self) -> Option<&Mapping> {
        self.root.get(PATHS).and_then(Value::as_mapping)
    }

    fn paths_mut(&mut self) -> Result<&mut Mapping, RouterError> {
        let key = Value::String(PATHS.to_string());
        let slot = self
            .root
            .entry(key)
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if slot.is_null() {
            *slot = Value::Mapping(Mapping::new());
        }
        slot.as_mapping_mut()
            .ok_or_else(|| RouterError::InvalidTable("`paths` is not a mapping".to_string()))
    }

    pub fn path_ids(&self) -> Vec<String> {
        self.paths()
            .map(|paths| {
                paths
                    .keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.paths()
            .map(|paths| paths.contains_key(stream_id))
            .unwrap_or(false)
    }

    pub fn get(&self, stream_id: &str) -> Option<PathEntry> {
        let value = self.paths()?.get(stream_id)?;
        serde_yaml::from_value(value.clone()).ok()
    }

    /// Removes the listed ids and returns how many were present.
    pub fn remove_all<S: AsRef<str>>(&mut self, stream_ids: &[S]) -> usize {
        let Some(paths) = self.root.get_mut(PATHS).and_then(Value::as_mapping_mut) else {
            return 0;
        };
        stream_ids
            .iter()
            .filter(|id| paths.remove(id.as_ref()).is_some())
            .count()
    }

    /// Inserts or overwrites one entry.
    pub fn insert(&mut self, stream_id: &str, entry: &PathEntry) -> Result<(), RouterError> {
        let value = serde_yaml::to_value(entry)?;
        self.paths_mut()?
            .insert(Value::String(stream_id.to_string()), value);
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
logLevel: info
api: yes
paths:
  all_others:
  cam_1:
    source: rtsp://10.0.0.2:8554/cam_1
    sourceOnDemand: true
    sourceProtocol: tcp
    sourceOnDemandCloseAfter: 5s
";

    #[test]
    fn keeps_unrelated_keys() {
        let mut table = PathTable::parse(SAMPLE).unwrap();
        assert_eq!(table.remove_all(&["cam_1", "missing"]), 1);
        let text = serde_yaml::to_string(&Value::Mapping(table.root.clone())).unwrap();
        assert!(text.contains("logLevel: info"));
        assert!(text.contains("all_others"));
        assert!(!text.contains("cam_1"));
    }

    #[test]
    fn insert_creates_paths_section() {
        let mut table = PathTable::parse("logLevel: info\n").unwrap();
        let target = StreamTarget {
            stream_id: "cam_12".into(),
            address: "100.64.0.3".into(),
            port: 8554,
        };
        table.insert(&target.stream_id, &target.entry()).unwrap();

        let entry = table.get("cam_12").unwrap();
        assert_eq!(entry.source, "rtsp://100.64.0.3:8554/cam_12");
        assert!(entry.source_on_demand);
        assert_eq!(entry.source_on_demand_close_after, "5s");
        assert_eq!(table.path_ids(), vec!["cam_12"]);
    }

    #[test]
    fn null_paths_section_is_usable() {
        let mut table = PathTable::parse("paths:\n").unwrap();
        assert!(table.path_ids().is_empty());
        table
            .insert("a", &PathEntry::rtsp_pull("h", 8554, "a"))
            .unwrap();
        assert!(table.contains("a"));
    }

    #[test]
    fn rejects_non_mapping_document() {
        assert!(matches!(
            PathTable::parse("- a\n- b\n"),
            Err(RouterError::InvalidTable(_))
        ));
        assert!(PathTable::parse("").unwrap().path_ids().is_empty());
    }

    #[tokio::test]
    async fn save_then_load_through_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.yml");
        let mut table = PathTable::parse(SAMPLE).unwrap();
        table
            .insert("cam_2", &PathEntry::rtsp_pull("h", 8554, "cam_2"))
            .unwrap();
        table.save(&path).await.unwrap();

        assert!(!temp_path(&path).exists());
        let loaded = PathTable::load(&path).await.unwrap();
        assert!(loaded.contains("cam_1"));
        assert!(loaded.contains("cam_2"));
    }
}
