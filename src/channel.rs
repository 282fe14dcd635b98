//! Plain-text input/output channels, one directory per persona
//!
//! ```text
//! <root>/<persona>/input.txt   trigger payload, cleared after each read
//! <root>/<persona>/output.txt  latest reply, replaced atomically
//! <root>/<persona>/prompt.md   optional system prompt override
//! ```

use crate::persona::{PersonaId, PersonaProfile};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const INPUT_FILE: &str = "input.txt";
pub const OUTPUT_FILE: &str = "output.txt";
pub const PROMPT_FILE: &str = "prompt.md";

#[derive(Error, Debug)]
#[error("Failed to {op} {path}: {source}")]
pub struct ChannelError {
    pub op: &'static str,
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl ChannelError {
    fn new(op: &'static str, path: &Path, source: io::Error) -> Self {
        Self {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File locations for one persona
#[derive(Debug, Clone)]
pub struct PersonaChannels {
    pub persona: PersonaId,
    pub dir: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub prompt: PathBuf,
}

impl PersonaChannels {
    pub fn new(root: &Path, persona: PersonaId) -> Self {
        Self::at(root.join(persona.as_str()), persona)
    }

    fn at(dir: PathBuf, persona: PersonaId) -> Self {
        Self {
            persona,
            input: dir.join(INPUT_FILE),
            output: dir.join(OUTPUT_FILE),
            prompt: dir.join(PROMPT_FILE),
            dir,
        }
    }

    /// Like [`PersonaChannels::new`], but reuses an existing directory under
    /// `root` whose name matches the persona case-insensitively. An exact
    /// lowercase match wins over other spellings.
    pub async fn resolve(root: &Path, persona: PersonaId) -> Result<Self, ChannelError> {
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new(root, persona)),
            Err(e) => return Err(ChannelError::new("list", root, e)),
        };

        let mut matches = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ChannelError::new("list", root, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if is_dir && name.parse::<PersonaId>().ok() == Some(persona) {
                matches.push(name);
            }
        }

        if matches.iter().any(|name| name == persona.as_str()) {
            return Ok(Self::new(root, persona));
        }
        matches.sort();
        match matches.first() {
            Some(name) => {
                tracing::info!(persona = %persona, dir = %name, "Using existing persona directory");
                Ok(Self::at(root.join(name), persona))
            }
            None => Ok(Self::new(root, persona)),
        }
    }

    /// Create the directory and empty channel files if they are missing
    pub async fn ensure(&self) -> Result<(), ChannelError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ChannelError::new("create", &self.dir, e))?;
        for path in [&self.input, &self.output] {
            if !tokio::fs::try_exists(path)
                .await
                .map_err(|e| ChannelError::new("stat", path, e))?
            {
                tokio::fs::write(path, b"")
                    .await
                    .map_err(|e| ChannelError::new("create", path, e))?;
            }
        }
        Ok(())
    }

    /// Read the input channel once and clear it. Returns the trimmed payload,
    /// or `None` when the channel is missing, empty or whitespace-only.
    pub async fn take_input(&self) -> Result<Option<String>, ChannelError> {
        match self.claim_input().await? {
            Some(claim) => self.consume_claim(&claim).await,
            None => Ok(None),
        }
    }

    fn claim_path(&self) -> PathBuf {
        self.dir.join(format!(".{INPUT_FILE}.claim"))
    }

    /// Move the current input aside and put an empty input file back.
    ///
    /// An already-empty file is left alone so the clear does not generate
    /// another change notification. Anything written after the rename lands in
    /// the new `input.txt` and is picked up by the next attempt.
    async fn claim_input(&self) -> Result<Option<PathBuf>, ChannelError> {
        match tokio::fs::metadata(&self.input).await {
            Ok(meta) if !meta.is_file() => {
                let e = io::Error::new(io::ErrorKind::InvalidInput, "not a regular file");
                return Err(ChannelError::new("read", &self.input, e));
            }
            Ok(meta) if meta.len() == 0 => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChannelError::new("stat", &self.input, e)),
        }

        let claim = self.claim_path();
        match tokio::fs::rename(&self.input, &claim).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ChannelError::new("claim", &self.input, e)),
        }

        // The producer may already have written a fresh file
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.input)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(ChannelError::new("recreate", &self.input, e)),
        }

        Ok(Some(claim))
    }

    async fn consume_claim(&self, claim: &Path) -> Result<Option<String>, ChannelError> {
        let raw = tokio::fs::read_to_string(claim)
            .await
            .map_err(|e| ChannelError::new("read", claim, e))?;
        tokio::fs::remove_file(claim)
            .await
            .map_err(|e| ChannelError::new("remove", claim, e))?;

        let payload = raw.trim();
        Ok((!payload.is_empty()).then(|| payload.to_string()))
    }

    /// Replace the output channel contents via temp file + rename
    pub async fn write_output(&self, text: &str) -> Result<(), ChannelError> {
        let tmp = self.dir.join(format!(".{OUTPUT_FILE}.tmp"));
        tokio::fs::write(&tmp, text.as_bytes())
            .await
            .map_err(|e| ChannelError::new("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.output)
            .await
            .map_err(|e| ChannelError::new("replace", &self.output, e))
    }

    /// Load the persona profile, picking up `prompt.md` when present
    pub async fn load_profile(&self) -> Result<PersonaProfile, ChannelError> {
        let custom_prompt = match tokio::fs::read_to_string(&self.prompt).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(ChannelError::new("read", &self.prompt, e)),
        };
        Ok(PersonaProfile {
            custom_prompt,
            ..PersonaProfile::builtin(self.persona)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ensure_creates_layout() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Coach);
        channels.ensure().await.unwrap();
        assert!(channels.input.is_file());
        assert!(channels.output.is_file());
        assert!(channels.dir.ends_with("coach"));

        // Existing content survives a second ensure
        tokio::fs::write(&channels.output, "kept").await.unwrap();
        channels.ensure().await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&channels.output).await.unwrap(), "kept");
    }

    #[tokio::test]
    async fn test_take_input_reads_then_clears() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Coach);
        channels.ensure().await.unwrap();

        tokio::fs::write(&channels.input, "  coach how are you\n").await.unwrap();
        let payload = channels.take_input().await.unwrap();
        assert_eq!(payload.as_deref(), Some("coach how are you"));
        assert_eq!(tokio::fs::read_to_string(&channels.input).await.unwrap(), "");

        assert!(channels.take_input().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_after_claim_survives() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Ellis);
        channels.ensure().await.unwrap();
        tokio::fs::write(&channels.input, "first").await.unwrap();

        let claim = channels.claim_input().await.unwrap().expect("non-empty input is claimed");
        // Producer writes again before the claimed payload has been read
        tokio::fs::write(&channels.input, "second").await.unwrap();

        let claimed = channels.consume_claim(&claim).await.unwrap();
        assert_eq!(claimed.as_deref(), Some("first"));
        assert!(!claim.exists());
        assert_eq!(channels.take_input().await.unwrap().as_deref(), Some("second"));
        assert_eq!(tokio::fs::read_to_string(&channels.input).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_empty_input_is_not_claimed() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Bill);
        channels.ensure().await.unwrap();
        assert!(channels.claim_input().await.unwrap().is_none());
        assert!(!channels.claim_path().exists());
        assert!(channels.input.is_file());
    }

    #[tokio::test]
    async fn test_resolve_reuses_mixed_case_dir() {
        let root = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(root.path().join("Coach")).await.unwrap();
        tokio::fs::write(root.path().join("Coach").join(INPUT_FILE), "coach hello")
            .await
            .unwrap();

        let channels = PersonaChannels::resolve(root.path(), PersonaId::Coach)
            .await
            .unwrap();
        assert_eq!(channels.dir, root.path().join("Coach"));
        channels.ensure().await.unwrap();
        assert_eq!(channels.take_input().await.unwrap().as_deref(), Some("coach hello"));

        let entries: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "no second lowercase directory");
    }

    #[tokio::test]
    async fn test_resolve_defaults_to_lowercase() {
        let root = tempfile::tempdir().unwrap();
        tokio::fs::write(root.path().join("Zoey"), "a file, not a directory")
            .await
            .unwrap();
        let channels = PersonaChannels::resolve(root.path(), PersonaId::Zoey)
            .await
            .unwrap();
        assert_eq!(channels.dir, root.path().join("zoey"));

        let missing = root.path().join("not-created-yet");
        let channels = PersonaChannels::resolve(&missing, PersonaId::Louis)
            .await
            .unwrap();
        assert_eq!(channels.dir, missing.join("louis"));
    }

    #[tokio::test]
    async fn test_whitespace_input_is_noop() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Nick);
        channels.ensure().await.unwrap();
        tokio::fs::write(&channels.input, " \n\t ").await.unwrap();
        assert!(channels.take_input().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_input_is_none() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Zoey);
        assert!(channels.take_input().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_output_replaces() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Francis);
        channels.ensure().await.unwrap();
        channels.write_output("first reply").await.unwrap();
        channels.write_output("second").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&channels.output).await.unwrap(), "second");
        assert!(!channels.dir.join(".output.txt.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_output_reports_path_on_error() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Rochelle);
        // Directory never created
        let err = channels.write_output("x").await.unwrap_err();
        assert_eq!(err.op, "write");
        assert!(err.to_string().contains("rochelle"));
    }

    #[tokio::test]
    async fn test_load_profile() {
        let root = tempfile::tempdir().unwrap();
        let channels = PersonaChannels::new(root.path(), PersonaId::Louis);
        channels.ensure().await.unwrap();
        assert!(channels.load_profile().await.unwrap().custom_prompt.is_none());

        tokio::fs::write(&channels.prompt, "You are an upbeat analyst.").await.unwrap();
        let profile = channels.load_profile().await.unwrap();
        assert_eq!(profile.custom_prompt.as_deref(), Some("You are an upbeat analyst."));
    }
}
