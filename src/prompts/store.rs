use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError, RwLock},
    time::SystemTime,
};

use crate::error::{MonitorError, MonitorResult};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const DEFAULT_PROMPT: &str = "Watch for baby climbing out of crib";
pub const MAX_PROMPT_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskPrompt {
    pub version: u64,
    pub text: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<String>,
    #[serde(default)]
    pub default_flag: bool,
}

impl RiskPrompt {
    fn seed() -> Self {
        Self {
            version: 1,
            text: DEFAULT_PROMPT.into(),
            updated_at: Utc::now(),
            updated_by: None,
            default_flag: true,
        }
    }
}

/// On-disk layout: the current prompt plus earlier versions, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PromptRecord {
    #[serde(flatten)]
    current: RiskPrompt,
    #[serde(default)]
    history: Vec<RiskPrompt>,
}

pub fn validate_prompt_text(text: &str) -> MonitorResult<&str> {
    let text = text.trim();
    if text.is_empty() {
        return Err(MonitorError::Validation("prompt text cannot be empty".into()));
    }
    let len = text.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(MonitorError::Validation(format!(
            "prompt text is {len} characters; the limit is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(text)
}

/// Versioned risk prompt persisted as JSON with write-temp-then-rename.
///
/// Readers never wait on disk I/O. Writers are serialized, and the in-memory copy only
/// changes after the new record is safely on disk.
pub struct PromptStore {
    path: PathBuf,
    history_limit: usize,
    state: RwLock<PromptRecord>,
    writer: Mutex<Option<SystemTime>>,
}

impl PromptStore {
    /// Load the record at `path`, seeding the default prompt when the file is absent.
    /// A file that exists but cannot be parsed is an error.
    pub fn open(path: PathBuf, history_limit: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create prompt directory {}", parent.display())
            })?;
        }

        let record = if path.exists() {
            let record = read_record(&path)?;
            log_info!(
                "Loaded risk prompt v{} from {}",
                record.current.version,
                path.display()
            );
            record
        } else {
            let record = PromptRecord {
                current: RiskPrompt::seed(),
                history: Vec::new(),
            };
            write_atomic(&path, &record)?;
            log_info!("Seeded default risk prompt at {}", path.display());
            record
        };

        let modified = modified_time(&path);
        Ok(Self {
            path,
            history_limit,
            state: RwLock::new(record),
            writer: Mutex::new(modified),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> RiskPrompt {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    pub fn update(&self, text: &str, author: Option<&str>) -> MonitorResult<RiskPrompt> {
        let text = validate_prompt_text(text)?;

        let mut last_modified = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let next = RiskPrompt {
            version: previous.current.version + 1,
            text: text.to_string(),
            updated_at: Utc::now(),
            updated_by: author.map(str::to_string),
            default_flag: false,
        };

        let mut history = previous.history;
        history.push(previous.current);
        let overflow = history.len().saturating_sub(self.history_limit);
        history.drain(..overflow);

        let record = PromptRecord {
            current: next.clone(),
            history,
        };

        write_atomic(&self.path, &record).map_err(|err| {
            log_warn!("Prompt v{} not persisted: {err:#}", next.version);
            MonitorError::Persistence(format!("{err:#}"))
        })?;

        *self.state.write().unwrap_or_else(PoisonError::into_inner) = record;
        *last_modified = modified_time(&self.path);

        log_info!(
            "Risk prompt updated to v{} by {}",
            next.version,
            next.updated_by.as_deref().unwrap_or("operator")
        );
        Ok(next)
    }

    /// Current prompt followed by earlier versions, most recent first.
    pub fn history(&self, limit: usize) -> Vec<RiskPrompt> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        std::iter::once(&state.current)
            .chain(state.history.iter().rev())
            .take(limit)
            .cloned()
            .collect()
    }

    /// Adopt the persisted record if it carries a newer version than memory.
    pub fn reload(&self) -> Result<bool> {
        let mut last_modified = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let record = read_record(&self.path)?;
        *last_modified = modified_time(&self.path);

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if record.current.version <= state.current.version {
            return Ok(false);
        }
        log_info!(
            "Hot-reloaded risk prompt v{} -> v{}",
            state.current.version,
            record.current.version
        );
        *state = record;
        Ok(true)
    }

    /// `reload` gated on the file's modification time having moved.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let modified = modified_time(&self.path);
        {
            let last = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            if modified.is_none() || modified == *last {
                return Ok(false);
            }
        }
        self.reload()
    }
}

fn read_record(path: &Path) -> Result<PromptRecord> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt record {}", path.display()))?;
    let record: PromptRecord = serde_json::from_str(&contents)
        .with_context(|| format!("Malformed prompt record {}", path.display()))?;
    if record.current.version == 0 {
        bail!("prompt record {} has version 0", path.display());
    }
    validate_prompt_text(&record.current.text)
        .with_context(|| format!("prompt record {} holds invalid text", path.display()))?;
    Ok(record)
}

fn write_atomic(path: &Path, record: &PromptRecord) -> Result<()> {
    let serialized = serde_json::to_string_pretty(record)?;
    let tmp_path = path.with_extension("json.tmp");

    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    file.write_all(serialized.as_bytes())
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", tmp_path.display()))?;
    drop(file);

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
