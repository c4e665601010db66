//! On-disk project layout.
//!
//! One directory per project id under a configured root:
//!
//! ```text
//! <root>/<project-id>/
//!   project.json
//!   resources/{scripts,voiceovers,broll,images,audio,videos}/
//!   exports/
//!   temp/
//! ```
//!
//! The core never rewrites files it did not create; tool outputs only add
//! new artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cf_domain::error::{Error, Result};

const RESOURCE_DIRS: [&str; 6] = [
    "scripts",
    "voiceovers",
    "broll",
    "images",
    "audio",
    "videos",
];

const VIDEO_EXTS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];
const IMAGE_EXTS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];
const AUDIO_EXTS: [&str; 5] = ["mp3", "wav", "m4a", "aac", "ogg"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manifest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `project.json` at the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectManifest {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub status: String,
    pub version: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Media inventory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub path: PathBuf,
    pub file_name: String,
    pub kind: MediaKind,
}

fn classify(path: &Path) -> Option<MediaKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    if VIDEO_EXTS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else if IMAGE_EXTS.contains(&ext.as_str()) {
        Some(MediaKind::Image)
    } else if AUDIO_EXTS.contains(&ext.as_str()) {
        Some(MediaKind::Audio)
    } else {
        None
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProjectLayout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Handle to one project directory.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    /// Open the project directory, scaffolding the tree and manifest when
    /// they do not exist yet. An existing `project.json` is left untouched.
    pub fn open_or_init(projects_root: &Path, project_id: &str) -> Result<Self> {
        let root = projects_root.join(project_id);
        for dir in RESOURCE_DIRS {
            fs::create_dir_all(root.join("resources").join(dir))?;
        }
        fs::create_dir_all(root.join("exports"))?;
        fs::create_dir_all(root.join("temp"))?;

        let manifest_path = root.join("project.json");
        if !manifest_path.exists() {
            let now = Utc::now();
            let manifest = ProjectManifest {
                id: project_id.to_string(),
                name: project_id.to_string(),
                created_at: now,
                last_modified: now,
                status: "active".into(),
                version: "1".into(),
            };
            fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest(&self) -> Result<ProjectManifest> {
        let raw = fs::read_to_string(self.root.join("project.json"))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Bump `lastModified` on the manifest. Called after a tool adds an
    /// artifact.
    pub fn touch(&self) -> Result<()> {
        let mut manifest = self.manifest()?;
        manifest.last_modified = Utc::now();
        fs::write(
            self.root.join("project.json"),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Ok(())
    }

    pub fn resource_dir(&self, name: &str) -> Result<PathBuf> {
        if !RESOURCE_DIRS.contains(&name) {
            return Err(Error::NotFound(format!("resource directory '{name}'")));
        }
        Ok(self.root.join("resources").join(name))
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("resources").join("scripts")
    }

    pub fn voiceovers_dir(&self) -> PathBuf {
        self.root.join("resources").join("voiceovers")
    }

    pub fn broll_dir(&self) -> PathBuf {
        self.root.join("resources").join("broll")
    }

    pub fn videos_dir(&self) -> PathBuf {
        self.root.join("resources").join("videos")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.root.join("exports")
    }

    /// Script text, if a `script.txt` or `script.json` exists in the
    /// scripts resource directory. The JSON form carries the text in a
    /// `content` field.
    pub fn read_script(&self) -> Option<String> {
        let txt = self.scripts_dir().join("script.txt");
        if let Ok(content) = fs::read_to_string(&txt) {
            if !content.trim().is_empty() {
                return Some(content);
            }
        }
        let json_path = self.scripts_dir().join("script.json");
        if let Ok(raw) = fs::read_to_string(&json_path) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
                    if !content.trim().is_empty() {
                        return Some(content.to_string());
                    }
                }
            }
        }
        None
    }

    /// Enumerate every classifiable media file under `resources/`,
    /// sorted by path for determinism.
    pub fn media_inventory(&self) -> Result<Vec<MediaItem>> {
        let mut items = Vec::new();
        for dir in RESOURCE_DIRS {
            let dir_path = self.root.join("resources").join(dir);
            let entries = match fs::read_dir(&dir_path) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                if let Some(kind) = classify(&path) {
                    items.push(MediaItem {
                        file_name: path
                            .file_name()
                            .and_then(|n| n.to_str())
                            .unwrap_or_default()
                            .to_string(),
                        kind,
                        path,
                    });
                }
            }
        }
        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(items)
    }
}
