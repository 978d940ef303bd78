// ── File-backed bus ──
//
// One directory per bus. Each stream is a `<name>.stream.json` descriptor
// plus a `<name>.jsonl` log with one stored message per line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::{BusConnection, BusConnector, PublishAck, StreamConfig, StreamInfo};
use crate::error::Error;
use crate::subject::subject_matches;

const DESCRIPTOR_SUFFIX: &str = ".stream.json";

#[derive(Debug, Serialize, Deserialize)]
struct Descriptor {
    config: StreamConfig,
    created: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct LogLine<'a> {
    seq: u64,
    subject: &'a str,
    received: DateTime<Utc>,
    payload: serde_json::Value,
}

// ── FileBus ──────────────────────────────────────────────────────────

/// Bus persisted under a directory.
#[derive(Debug, Clone)]
pub struct FileBus {
    root: PathBuf,
}

impl FileBus {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl BusConnector for FileBus {
    async fn connect(&self) -> Result<Box<dyn BusConnection>, Error> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::BusConnect {
                reason: format!("{}: {e}", self.root.display()),
            })?;

        let mut conn = FileConnection {
            root: self.root.clone(),
            streams: BTreeMap::new(),
        };
        conn.load_streams().await?;
        Ok(Box::new(conn))
    }
}

// ── FileConnection ───────────────────────────────────────────────────

struct OpenStream {
    descriptor: Descriptor,
    next_sequence: u64,
}

struct FileConnection {
    root: PathBuf,
    streams: BTreeMap<String, OpenStream>,
}

impl FileConnection {
    fn descriptor_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}{DESCRIPTOR_SUFFIX}"))
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.jsonl"))
    }

    async fn load_streams(&mut self) -> Result<(), Error> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name
                .to_str()
                .and_then(|n| n.strip_suffix(DESCRIPTOR_SUFFIX))
            else {
                continue;
            };
            let name = name.to_owned();
            if let Some(stream) = self.open_stream(&name).await? {
                self.streams.insert(name, stream);
            }
        }
        Ok(())
    }

    async fn open_stream(&self, name: &str) -> Result<Option<OpenStream>, Error> {
        let raw = match tokio::fs::read(self.descriptor_path(name)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let descriptor: Descriptor =
            serde_json::from_slice(&raw).map_err(|e| Error::Deserialization {
                message: e.to_string(),
                body: String::from_utf8_lossy(&raw).into_owned(),
            })?;
        let stored = match tokio::fs::read_to_string(self.log_path(name)).await {
            Ok(log) => log.lines().filter(|l| !l.is_empty()).count() as u64,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        Ok(Some(OpenStream {
            descriptor,
            next_sequence: stored + 1,
        }))
    }
}

fn stream_info(stream: &OpenStream) -> StreamInfo {
    StreamInfo {
        config: stream.descriptor.config.clone(),
        created: stream.descriptor.created,
        messages: stream.next_sequence - 1,
    }
}

#[async_trait]
impl BusConnection for FileConnection {
    async fn stream_info(&mut self, name: &str) -> Result<Option<StreamInfo>, Error> {
        // another process may have created it since connect
        if !self.streams.contains_key(name) {
            if let Some(stream) = self.open_stream(name).await? {
                self.streams.insert(name.to_owned(), stream);
            }
        }
        Ok(self.streams.get(name).map(stream_info))
    }

    async fn add_stream(&mut self, config: &StreamConfig) -> Result<StreamInfo, Error> {
        if let Some(existing) = self.streams.get(&config.name) {
            if existing.descriptor.config == *config {
                return Ok(stream_info(existing));
            }
            return Err(Error::StreamCreate {
                name: config.name.clone(),
                reason: "stream name already in use with a different configuration".into(),
            });
        }

        let descriptor = Descriptor {
            config: config.clone(),
            created: Utc::now(),
        };
        let body = serde_json::to_vec_pretty(&descriptor)?;
        tokio::fs::write(self.descriptor_path(&config.name), body)
            .await
            .map_err(|e| Error::StreamCreate {
                name: config.name.clone(),
                reason: e.to_string(),
            })?;

        let stream = OpenStream {
            descriptor,
            next_sequence: 1,
        };
        let info = stream_info(&stream);
        self.streams.insert(config.name.clone(), stream);
        Ok(info)
    }

    async fn publish(&mut self, subject: &str, payload: Bytes) -> Result<PublishAck, Error> {
        let (name, sequence) = self
            .streams
            .iter()
            .find(|(_, s)| {
                s.descriptor
                    .config
                    .subjects
                    .iter()
                    .any(|f| subject_matches(f, subject))
            })
            .map(|(name, s)| (name.clone(), s.next_sequence))
            .ok_or_else(|| Error::NoStreamForSubject {
                subject: subject.to_owned(),
            })?;

        // JSON payloads are embedded as-is, anything else as a string
        let payload = serde_json::from_slice(&payload)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&payload).into_owned()));
        let mut line = serde_json::to_vec(&LogLine {
            seq: sequence,
            subject,
            received: Utc::now(),
            payload,
        })?;
        line.push(b'\n');

        let publish_err = |e: std::io::Error| Error::Publish {
            subject: subject.to_owned(),
            reason: e.to_string(),
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(&name))
            .await
            .map_err(publish_err)?;
        file.write_all(&line).await.map_err(publish_err)?;
        file.flush().await.map_err(publish_err)?;

        if let Some(stream) = self.streams.get_mut(&name) {
            stream.next_sequence += 1;
        }
        Ok(PublishAck {
            stream: name,
            sequence,
        })
    }
}
