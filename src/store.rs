/// Token cache with pluggable storage
use crate::error::{OAuthError, Result};
use crate::token::CachedToken;
use parking_lot::RwLock;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name used by [`FileTokenStore::for_app`]
pub const CACHE_FILE_NAME: &str = "access_token.csv";

/// Storage interface for the cached token
pub trait TokenStore: Send + Sync {
    /// Load the cached token, `None` when nothing is cached
    fn load(&self) -> Result<Option<CachedToken>>;

    /// Replace the cached token
    fn save(&self, token: &CachedToken) -> Result<()>;

    /// Forget the cached token
    fn clear(&self) -> Result<()>;
}

/// In-memory storage implementation
///
/// Suitable for testing and for embedding in long-running processes.
#[derive(Debug, Default, Clone)]
pub struct MemoryTokenStore {
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<CachedToken>> {
        Ok(self.token.read().clone())
    }

    fn save(&self, token: &CachedToken) -> Result<()> {
        *self.token.write() = Some(token.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.token.write() = None;
        Ok(())
    }
}

/// Flat-file storage holding a single CSV row:
/// `checkpoint,access_token,refresh_token`
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    /// Use the cache file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use `<data_dir>/<app_name>/access_token.csv`
    ///
    /// Respects `$XDG_DATA_HOME`, falling back to the platform data directory
    /// (`~/.local/share` on Linux, `Application Support` on macOS, `AppData` on Windows).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use pcs_token::store::FileTokenStore;
    ///
    /// let store = FileTokenStore::for_app("my-app").unwrap();
    /// assert!(store.path().ends_with("my-app/access_token.csv"));
    /// ```
    pub fn for_app(app_name: &str) -> Result<Self> {
        let base_dir = data_dir(std::env::var("XDG_DATA_HOME").ok())?;
        Ok(Self::new(base_dir.join(app_name).join(CACHE_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_failed(&self, source: std::io::Error) -> OAuthError {
        OAuthError::CacheWrite {
            path: self.path.clone(),
            source,
        }
    }
}

fn data_dir(xdg_data_home: Option<String>) -> Result<PathBuf> {
    match xdg_data_home {
        Some(xdg_data) if !xdg_data.is_empty() => Ok(PathBuf::from(xdg_data)),
        _ => dirs::data_dir()
            .ok_or_else(|| OAuthError::MissingField("data directory".to_string())),
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<CachedToken>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %self.path.display(), "token cache is empty");
            return Ok(None);
        }

        // Quoted fields may span lines, so the whole file is one record
        decode_record(&content).map(Some)
    }

    fn save(&self, token: &CachedToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.write_failed(e))?;
            }
        }

        fs::write(&self.path, encode_record(token)).map_err(|e| self.write_failed(e))?;
        tracing::debug!(path = %self.path.display(), "token cache written");
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Serialize a token as one CSV row terminated by a newline
pub fn encode_record(token: &CachedToken) -> String {
    let checkpoint = token.checkpoint.to_string();
    let fields = [
        checkpoint.as_str(),
        token.access_token.as_str(),
        token.refresh_token.as_str(),
    ];

    let mut line = fields
        .iter()
        .map(|field| quote_field(field))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn quote_field(field: &str) -> String {
    let needs_quotes = field
        .chars()
        .any(|c| matches!(c, ',' | '"' | '\\' | '\n' | '\r' | '\t' | ' '));

    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Parse one CSV row written by [`encode_record`], trailing line terminator included
pub fn decode_record(line: &str) -> Result<CachedToken> {
    let fields = split_fields(line.trim_end_matches(['\r', '\n']))?;

    let [checkpoint, access_token, refresh_token]: [String; 3] =
        fields.try_into().map_err(|fields: Vec<String>| {
            OAuthError::InvalidCache(format!("expected 3 fields, found {}", fields.len()))
        })?;

    let checkpoint = checkpoint
        .trim()
        .parse()
        .map_err(|_| OAuthError::InvalidCache(format!("invalid checkpoint: {:?}", checkpoint)))?;

    Ok(CachedToken {
        checkpoint,
        access_token,
        refresh_token,
    })
}

fn split_fields(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err(OAuthError::InvalidCache("unterminated quoted field".into()));
    }

    fields.push(current);
    Ok(fields)
}
