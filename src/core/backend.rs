//! Purpose: Closed set of settings backends selected by a `<scheme>+<details>` URI.
//! Exports: `BackendUri`, `SettingsBackend`, `MemoryBackend`, `FileBackend`, `HttpBackend`.
//! Role: Source of truth for mutable settings; the synchronizer pulls from it every tick.
//! Invariants: `fetch` never mutates; `Ok(None)` means the backend holds no value for the key.
//! Invariants: Keys are the same fully-qualified `group.option` strings the registry uses.
//! Notes: `store` is an administrative write path and is never called by the synchronizer.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::core::error::{Error, ErrorKind};
use crate::json::parse;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackendUri {
    Memory { label: String },
    File { path: PathBuf },
    Http { url: Url },
}

impl BackendUri {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let (scheme, details) = raw.split_once('+').ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("backend uri `{raw}` has no scheme"))
                .with_hint("Use `<scheme>+<details>`, e.g. `file+/etc/app/live.json`.")
        })?;
        match scheme {
            "memory" => Ok(BackendUri::Memory {
                label: details.to_string(),
            }),
            "file" => {
                if details.is_empty() {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("file backend requires a path"));
                }
                Ok(BackendUri::File {
                    path: PathBuf::from(details),
                })
            }
            "http" => {
                let url = Url::parse(details).map_err(|err| {
                    Error::new(ErrorKind::Usage)
                        .with_message(format!("invalid backend url `{details}`"))
                        .with_source(err)
                })?;
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(Error::new(ErrorKind::Usage)
                        .with_message("http backend url must use http or https"));
                }
                Ok(BackendUri::Http { url })
            }
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unknown settings backend `{other}`"))
                .with_hint("Supported backends: memory, file, http.")),
        }
    }
}

#[derive(Clone, Debug)]
pub enum SettingsBackend {
    Memory(MemoryBackend),
    File(FileBackend),
    Http(HttpBackend),
}

impl SettingsBackend {
    pub fn from_uri(raw: &str) -> Result<Self, Error> {
        Ok(match BackendUri::parse(raw)? {
            BackendUri::Memory { label } => SettingsBackend::Memory(MemoryBackend::labeled(label)),
            BackendUri::File { path } => SettingsBackend::File(FileBackend::new(path)),
            BackendUri::Http { url } => SettingsBackend::Http(HttpBackend::new(url)),
        })
    }

    pub fn describe(&self) -> String {
        match self {
            SettingsBackend::Memory(backend) => format!("memory+{}", backend.label),
            SettingsBackend::File(backend) => format!("file+{}", backend.path.display()),
            SettingsBackend::Http(backend) => format!("http+{}", backend.url),
        }
    }

    pub fn fetch(&self, key: &str) -> Result<Option<Value>, Error> {
        match self {
            SettingsBackend::Memory(backend) => backend.fetch(key),
            SettingsBackend::File(backend) => Ok(pick(&backend.document()?, key)),
            SettingsBackend::Http(backend) => Ok(pick(&backend.document()?, key)),
        }
    }

    /// Fetches several keys; document backends read their source once for the whole batch.
    pub fn fetch_many(&self, keys: &[String]) -> Vec<(String, Result<Option<Value>, Error>)> {
        let document = match self {
            SettingsBackend::Memory(backend) => {
                return keys
                    .iter()
                    .map(|key| (key.clone(), backend.fetch(key)))
                    .collect();
            }
            SettingsBackend::File(backend) => backend.document(),
            SettingsBackend::Http(backend) => backend.document(),
        };
        match document {
            Ok(document) => keys
                .iter()
                .map(|key| (key.clone(), Ok(pick(&document, key))))
                .collect(),
            Err(err) => keys
                .iter()
                .map(|key| {
                    let failure = Error::new(ErrorKind::Backend)
                        .with_message(err.to_string())
                        .with_key(key.clone());
                    (key.clone(), Err(failure))
                })
                .collect(),
        }
    }

    pub fn store(&self, key: &str, value: Value) -> Result<(), Error> {
        let (group, option) = split_key(key)?;
        match self {
            SettingsBackend::Memory(backend) => backend.store(key, value),
            SettingsBackend::File(backend) => backend.store(group, option, value),
            SettingsBackend::Http(backend) => backend.store(group, option, value),
        }
    }
}

fn split_key(key: &str) -> Result<(&str, &str), Error> {
    key.split_once('.').ok_or_else(|| {
        Error::new(ErrorKind::MalformedKey)
            .with_message("backend keys look like `group.option`")
            .with_key(key)
    })
}

fn pick(document: &Map<String, Value>, key: &str) -> Option<Value> {
    let (group, option) = key.split_once('.')?;
    document.get(group)?.as_object()?.get(option).cloned()
}

/// In-process backend; clones share the same map. Values die with the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend {
    label: String,
    values: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            values: Arc::default(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn fetch(&self, key: &str) -> Result<Option<Value>, Error> {
        let values = self.values.read().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    pub fn store(&self, key: &str, value: Value) -> Result<(), Error> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>, Error> {
        let mut values = self.values.write().map_err(|_| poisoned())?;
        Ok(values.remove(key))
    }
}

fn poisoned() -> Error {
    Error::new(ErrorKind::Internal).with_message("memory backend lock poisoned")
}

/// JSON document on disk shaped like the settings source; guarded by `<path>.lock`.
#[derive(Clone, Debug)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn open_lock(&self) -> Result<File, Error> {
        let lock_path = self.lock_path();
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|err| {
                Error::new(ErrorKind::Backend)
                    .with_message("failed to open backend lock")
                    .with_path(&lock_path)
                    .with_source(err)
            })
    }

    pub fn document(&self) -> Result<Map<String, Value>, Error> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let lock = self.open_lock()?;
        lock.lock_shared().map_err(|err| {
            Error::new(ErrorKind::Backend)
                .with_message("failed to lock backend file")
                .with_path(&self.path)
                .with_source(err)
        })?;
        let document = parse::read_optional_document(&self.path);
        self.release(&lock);
        match document? {
            None => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(_) => Err(Error::new(ErrorKind::Backend)
                .with_message("backend document must be an object of groups")
                .with_path(&self.path)),
        }
    }

    pub fn store(&self, group: &str, option: &str, value: Value) -> Result<(), Error> {
        let lock = self.open_lock()?;
        lock.lock_exclusive().map_err(|err| {
            Error::new(ErrorKind::Backend)
                .with_message("failed to lock backend file")
                .with_path(&self.path)
                .with_source(err)
        })?;
        let result = self.rewrite(group, option, value);
        self.release(&lock);
        result
    }

    // Dropping the handle releases the lock too.
    fn release(&self, lock: &File) {
        if let Err(err) = FileExt::unlock(lock) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to unlock backend file");
        }
    }

    fn rewrite(&self, group: &str, option: &str, value: Value) -> Result<(), Error> {
        let mut document = match parse::read_optional_document(&self.path)? {
            None => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(Error::new(ErrorKind::Backend)
                    .with_message("backend document must be an object of groups")
                    .with_path(&self.path));
            }
        };
        let slot = document
            .entry(group.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(options) = slot.as_object_mut() else {
            return Err(Error::new(ErrorKind::Backend)
                .with_message(format!("backend group `{group}` is not an object"))
                .with_path(&self.path));
        };
        options.insert(option.to_string(), value);

        let text = serde_json::to_string_pretty(&Value::Object(document)).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode backend document")
                .with_source(err)
        })?;
        let staging = self.path.with_extension("json.tmp");
        let write = |path: &Path| -> std::io::Result<()> {
            let mut file = File::create(path)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()
        };
        write(&staging)
            .and_then(|_| std::fs::rename(&staging, &self.path))
            .map_err(|err| {
                Error::new(ErrorKind::Backend)
                    .with_message("failed to write backend file")
                    .with_path(&self.path)
                    .with_source(err)
            })
    }
}

#[derive(Deserialize, Serialize)]
struct ValueEnvelope {
    value: Value,
}

/// Remote document: `GET <url>` returns the grouped document, `PUT <url>/<group>/<option>` stores.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    url: Url,
    agent: ureq::Agent,
}

impl HttpBackend {
    pub fn new(url: Url) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(std::time::Duration::from_secs(5))
            .build();
        Self { url, agent }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn document(&self) -> Result<Map<String, Value>, Error> {
        let response = self
            .agent
            .get(self.url.as_str())
            .set("Accept", "application/json")
            .call();
        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(Map::new()),
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::new(ErrorKind::Backend)
                    .with_message(format!("settings backend returned status {code}")));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::Backend)
                    .with_message("settings backend request failed")
                    .with_source(err));
            }
        };
        let body = response.into_string().map_err(|err| {
            Error::new(ErrorKind::Backend)
                .with_message("failed to read settings backend response")
                .with_source(err)
        })?;
        match parse::from_str::<Value>(&body)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::new(ErrorKind::Backend)
                .with_message("settings backend response must be an object of groups")),
        }
    }

    pub fn store(&self, group: &str, option: &str, value: Value) -> Result<(), Error> {
        let mut url = self.url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::new(ErrorKind::Usage).with_message("backend url cannot take a path"))?
            .pop_if_empty()
            .push(group)
            .push(option);
        let payload = serde_json::to_string(&ValueEnvelope { value }).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_source(err)
        })?;
        let response = self
            .agent
            .put(url.as_str())
            .set("Content-Type", "application/json")
            .send_string(&payload);
        match response {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(code, _)) => Err(Error::new(ErrorKind::Backend)
                .with_message(format!("settings backend returned status {code}"))
                .with_key(format!("{group}.{option}"))),
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Backend)
                .with_message("settings backend request failed")
                .with_source(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendUri, FileBackend, SettingsBackend};
    use crate::core::error::ErrorKind;
    use serde_json::json;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::path::PathBuf;

    #[test]
    fn parses_backend_uris() {
        assert_eq!(
            BackendUri::parse("file+/etc/app/live.json").expect("file"),
            BackendUri::File {
                path: PathBuf::from("/etc/app/live.json")
            }
        );
        assert!(matches!(
            BackendUri::parse("memory+default").expect("memory"),
            BackendUri::Memory { .. }
        ));
        assert!(matches!(
            BackendUri::parse("http+http://127.0.0.1:9000/settings").expect("http"),
            BackendUri::Http { .. }
        ));

        for raw in ["file", "memcached+127.0.0.1", "file+", "http+not a url", "http+ftp://x/"] {
            let err = BackendUri::parse(raw).expect_err(raw);
            assert_eq!(err.kind(), ErrorKind::Usage, "{raw}");
        }
    }

    #[test]
    fn memory_backend_clones_share_values() {
        let backend = SettingsBackend::from_uri("memory+test").expect("backend");
        let other = backend.clone();
        assert_eq!(backend.fetch("core.debug").expect("fetch"), None);
        other.store("core.debug", json!(true)).expect("store");
        assert_eq!(backend.fetch("core.debug").expect("fetch"), Some(json!(true)));
    }

    #[test]
    fn describe_keeps_backend_details() {
        let backend = SettingsBackend::from_uri("memory+shared").expect("memory");
        assert_eq!(backend.describe(), "memory+shared");
        let backend = SettingsBackend::from_uri("file+/tmp/live.json").expect("file");
        assert_eq!(backend.describe(), "file+/tmp/live.json");
    }

    #[test]
    fn store_releases_the_file_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("live.json");
        let backend = FileBackend::new(&path);
        backend.store("core", "debug", json!(true)).expect("store");
        let lock = backend.open_lock().expect("lock file");
        fs2::FileExt::try_lock_exclusive(&lock).expect("lock released after store");
        fs2::FileExt::unlock(&lock).expect("unlock");
        backend.document().expect("document");
        fs2::FileExt::try_lock_exclusive(&lock).expect("lock released after read");
    }

    #[test]
    fn file_backend_reads_and_stores_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("live.json");
        let backend = SettingsBackend::File(FileBackend::new(&path));

        assert_eq!(backend.fetch("core.debug").expect("missing file"), None);
        backend.store("core.debug", json!(true)).expect("store");
        backend.store("core.level", json!(3)).expect("store");
        assert_eq!(backend.fetch("core.debug").expect("fetch"), Some(json!(true)));

        let keys = vec!["core.level".to_string(), "core.absent".to_string()];
        let fetched = backend.fetch_many(&keys);
        assert_eq!(fetched[0].1.as_ref().expect("level"), &Some(json!(3)));
        assert_eq!(fetched[1].1.as_ref().expect("absent"), &None);

        std::fs::write(&path, "[1, 2]").expect("write");
        let fetched = backend.fetch_many(&keys);
        for (key, result) in fetched {
            let err = result.expect_err("bad document");
            assert_eq!(err.kind(), ErrorKind::Backend);
            assert_eq!(err.key(), Some(key.as_str()));
        }
    }

    #[test]
    fn http_backend_fetches_grouped_document() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut line = String::new();
            loop {
                line.clear();
                reader.read_line(&mut line).expect("read");
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let body = r#"{"core": {"debug": true}}"#;
            write!(
                stream,
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            )
            .expect("respond");
        });

        let backend =
            SettingsBackend::from_uri(&format!("http+http://{addr}/settings")).expect("backend");
        assert_eq!(backend.fetch("core.debug").expect("fetch"), Some(json!(true)));
        server.join().expect("server");
    }
}
