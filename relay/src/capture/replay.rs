use crate::viewer_bridge::hub::ViewerHub;
use anyhow::{bail, Context};
use dwellcore::detection::Classification;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One recorded frame: optional base64 JPEG plus its classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEntry {
    pub offset_ms: u64,
    #[serde(default)]
    pub image: Option<String>,
    pub result: Classification,
}

/// Replays a JSON-lines capture at its recorded pace.
pub struct ReplaySource {
    path: PathBuf,
    entries: Vec<ReplayEntry>,
}

impl ReplaySource {
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            bail!("no capture source found: {} does not exist", path_ref.display());
        }
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading capture {}", path_ref.display()))?;
        let entries = Self::parse(&contents)
            .with_context(|| format!("parsing capture {}", path_ref.display()))?;
        Ok(Self {
            path: path_ref.to_path_buf(),
            entries,
        })
    }

    pub fn parse(contents: &str) -> anyhow::Result<Vec<ReplayEntry>> {
        let mut entries: Vec<ReplayEntry> = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: ReplayEntry = serde_json::from_str(line)
                .with_context(|| format!("line {}", index + 1))?;
            if let Some(previous) = entries.last() {
                if entry.offset_ms < previous.offset_ms {
                    bail!("line {}: offsets must not go backwards", index + 1);
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn frame_count(&self) -> usize {
        self.entries.len()
    }

    pub async fn run(
        self,
        hub: ViewerHub,
        frames: mpsc::Sender<Classification>,
    ) -> anyhow::Result<()> {
        info!(
            "replaying {} frame(s) from {}",
            self.entries.len(),
            self.path.display()
        );
        let start = Instant::now();
        for entry in self.entries {
            tokio::time::sleep_until(start + Duration::from_millis(entry.offset_ms)).await;
            if let Some(image) = entry.image {
                hub.publish_image_base64(image);
            }
            if frames.send(entry.result).await.is_err() {
                info!("pipeline closed, stopping replay");
                return Ok(());
            }
        }
        info!("replay of {} finished", self.path.display());
        Ok(())
    }
}
