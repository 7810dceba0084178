use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use gemini_api::CookieBundle;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::CredentialStoreError;
use crate::paths::{credential_file_name, credential_root, DEFAULT_ACCOUNT};
use crate::schema::{CookieRecord, RECORD_VERSION};

/// Where the engine keeps the cookie bundle between runs.
///
/// Implementations store the whole bundle at once; partial updates are not
/// part of the contract.
pub trait CookieStore: Send + Sync {
    fn load(&self) -> Result<Option<CookieBundle>, CredentialStoreError>;
    fn save(&self, cookies: &CookieBundle) -> Result<(), CredentialStoreError>;
}

/// JSON file per account, written owner-only through a temp file and rename.
#[derive(Debug, Clone)]
pub struct FileCookieStore {
    path: PathBuf,
    account: String,
}

impl FileCookieStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            account: DEFAULT_ACCOUNT.to_owned(),
        }
    }

    /// `<home>/.gemini_web/credentials/<account>.json`.
    #[must_use]
    pub fn for_account(home: &Path, account: &str) -> Self {
        Self {
            path: credential_root(home).join(credential_file_name(account)),
            account: account.to_owned(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_record(&self) -> Result<Option<CookieRecord>, CredentialStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CredentialStoreError::io(
                    "reading credential file",
                    &self.path,
                    source,
                ))
            }
        };
        let record = serde_json::from_str::<CookieRecord>(&raw)
            .map_err(|source| CredentialStoreError::json_parse(&self.path, source))?;
        validate_record(&self.path, &record)?;
        Ok(Some(record))
    }
}

impl CookieStore for FileCookieStore {
    fn load(&self) -> Result<Option<CookieBundle>, CredentialStoreError> {
        Ok(self.load_record()?.map(|record| record.cookies))
    }

    fn save(&self, cookies: &CookieBundle) -> Result<(), CredentialStoreError> {
        if !cookies.has_primary() {
            return Err(CredentialStoreError::MissingPrimaryCookie {
                path: self.path.clone(),
            });
        }
        let record = CookieRecord::v1(&self.account, now_rfc3339()?, cookies.clone());
        let mut body = serde_json::to_string_pretty(&record)
            .map_err(|source| CredentialStoreError::json_serialize(&self.path, source))?;
        body.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| {
                CredentialStoreError::io("creating credential directory", parent, source)
            })?;
        }

        let temp_path = temp_path_for(&self.path);
        let result = write_owner_only(&temp_path, body.as_bytes()).and_then(|()| {
            fs::rename(&temp_path, &self.path).map_err(|source| {
                CredentialStoreError::io("replacing credential file", &self.path, source)
            })
        });
        if result.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        result
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "credentials".to_owned());
    path.with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()))
}

fn write_owner_only(path: &Path, bytes: &[u8]) -> Result<(), CredentialStoreError> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .map_err(|source| CredentialStoreError::io("creating temporary credential file", path, source))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .map_err(|source| CredentialStoreError::io("writing temporary credential file", path, source))
}

fn validate_record(path: &Path, record: &CookieRecord) -> Result<(), CredentialStoreError> {
    if record.version != RECORD_VERSION {
        return Err(CredentialStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found: record.version,
        });
    }
    if OffsetDateTime::parse(&record.saved_at, &Rfc3339).is_err() {
        return Err(CredentialStoreError::InvalidTimestamp {
            path: path.to_path_buf(),
            value: record.saved_at.clone(),
        });
    }
    if !record.cookies.has_primary() {
        return Err(CredentialStoreError::MissingPrimaryCookie {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn now_rfc3339() -> Result<String, CredentialStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(CredentialStoreError::ClockFormat)
}

/// Process-local store, mostly for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    cookies: Mutex<Option<CookieBundle>>,
    saves: Mutex<usize>,
}

impl MemoryCookieStore {
    #[must_use]
    pub fn with_cookies(cookies: CookieBundle) -> Self {
        Self {
            cookies: Mutex::new(Some(cookies)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.lock().map(|count| *count).unwrap_or(0)
    }
}

impl CookieStore for MemoryCookieStore {
    fn load(&self) -> Result<Option<CookieBundle>, CredentialStoreError> {
        self.cookies
            .lock()
            .map(|cookies| cookies.clone())
            .map_err(|_| CredentialStoreError::Poisoned)
    }

    fn save(&self, cookies: &CookieBundle) -> Result<(), CredentialStoreError> {
        *self.cookies.lock().map_err(|_| CredentialStoreError::Poisoned)? = Some(cookies.clone());
        *self.saves.lock().map_err(|_| CredentialStoreError::Poisoned)? += 1;
        Ok(())
    }
}
