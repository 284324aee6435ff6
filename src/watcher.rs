// 11.1: restart trigger. remembers each watched file's mtime at startup and reports
// the first one that differs. a file that can't be read keeps a None baseline.

use log::warn;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct ResourceWatcher {
    baselines: Vec<(PathBuf, Option<SystemTime>)>,
}

impl ResourceWatcher {
    pub fn new<P: AsRef<Path>>(paths: &[P]) -> Self {
        let baselines = paths
            .iter()
            .map(|p| {
                let path = p.as_ref().to_path_buf();
                let mtime = modified(&path);
                if mtime.is_none() {
                    warn!("Cannot read mtime of watched file {:?}", path);
                }
                (path, mtime)
            })
            .collect();
        Self { baselines }
    }

    /// First watched path whose mtime moved since startup.
    pub fn changed(&self) -> Option<&Path> {
        self.baselines
            .iter()
            .find(|(path, baseline)| modified(path) != *baseline)
            .map(|(path, _)| path.as_path())
    }

    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.baselines.iter().map(|(p, _)| p.as_path())
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
