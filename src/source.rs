// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Certificate source: discovers monitored entities and reads their expiry.
//!
//! The default source is a directory laid out the way ACME clients store
//! live certificates: one subdirectory per entity, each holding a PEM chain
//! file whose first certificate is the leaf.
//!
//! ```text
//! /etc/letsencrypt/live/
//! ├── a.example/fullchain.pem
//! ├── b.example/fullchain.pem
//! └── README
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};
use x509_cert::Certificate;
use x509_cert::time::Time;

use crate::error::{MonitorError, Result};

/// Default chain file name inside each entity directory.
pub const DEFAULT_CHAIN_FILE: &str = "fullchain.pem";

/// One entity as listed by a source, before its certificate is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    /// Unique entity id (typically a domain name).
    pub id: String,
    /// Path of the entity's certificate chain.
    pub certificate_path: PathBuf,
}

/// A monitored entity with its certificate expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    /// Unique entity id.
    pub id: String,
    /// `notAfter` of the leaf certificate.
    pub expiry: SystemTime,
}

/// Why an entity was left out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Certificate file missing or unreadable.
    Unreadable,
    /// Certificate present but no expiry could be parsed from it.
    Unparsable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable => f.write_str("unreadable"),
            Self::Unparsable => f.write_str("unparsable"),
        }
    }
}

/// An entity excluded from this run.
#[derive(Debug, Clone)]
pub struct SkippedEntity {
    /// Entity id.
    pub id: String,
    /// Classification of the failure.
    pub reason: SkipReason,
    /// Human readable error.
    pub error: String,
}

/// Enumerates entities and reads certificate expiry.
pub trait CertificateSource: Send + Sync {
    /// List all entities. Fails only if the store itself is inaccessible.
    fn list_entities(&self) -> Result<Vec<EntityRef>>;

    /// Read the expiry instant of the certificate at `path`.
    fn read_expiry(&self, path: &Path) -> Result<SystemTime>;
}

/// Directory-of-subdirectories certificate store.
#[derive(Debug, Clone)]
pub struct DirectoryCertificateSource {
    root: PathBuf,
    chain_file: String,
}

impl DirectoryCertificateSource {
    /// Create a source rooted at `root` using the default chain file name.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            chain_file: DEFAULT_CHAIN_FILE.to_string(),
        }
    }

    /// Set the chain file name looked up in each entity directory.
    pub fn with_chain_file(mut self, name: impl Into<String>) -> Self {
        self.chain_file = name.into();
        self
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl CertificateSource for DirectoryCertificateSource {
    fn list_entities(&self) -> Result<Vec<EntityRef>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| MonitorError::source_unavailable(&self.root, e))?;

        let mut entities = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MonitorError::source_unavailable(&self.root, e))?;
            let path = entry.path();
            if !path.is_dir() {
                debug!(path = %path.display(), "Ignoring non-directory entry");
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %path.display(), "Ignoring entity directory with non UTF-8 name");
                continue;
            };
            entities.push(EntityRef {
                certificate_path: path.join(&self.chain_file),
                id,
            });
        }

        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }

    fn read_expiry(&self, path: &Path) -> Result<SystemTime> {
        let pem = std::fs::read(path).map_err(|e| MonitorError::certificate_read(path, e))?;
        // x509-cert cannot decode a chain with no PEM content at all.
        if pem.iter().all(u8::is_ascii_whitespace) {
            return Err(MonitorError::certificate_parsing(format!(
                "{}: no certificate found",
                path.display()
            )));
        }
        let chain = Certificate::load_pem_chain(&pem)?;
        let leaf = chain.first().ok_or_else(|| {
            MonitorError::certificate_parsing(format!("{}: no certificate found", path.display()))
        })?;
        Ok(not_after(leaf))
    }
}

/// Expiry instant of a certificate.
pub fn not_after(cert: &Certificate) -> SystemTime {
    let duration = match &cert.tbs_certificate.validity.not_after {
        Time::UtcTime(utc) => utc.to_unix_duration(),
        Time::GeneralTime(r#gen) => r#gen.to_unix_duration(),
    };
    SystemTime::UNIX_EPOCH + duration
}

/// Read every entity from `source`, separating the ones that must be
/// skipped this run.
///
/// # Errors
///
/// Only a store-level failure is returned; per-entity problems end up in the
/// skipped list.
pub fn load_entities(
    source: &dyn CertificateSource,
) -> Result<(Vec<Entity>, Vec<SkippedEntity>)> {
    let mut entities = Vec::new();
    let mut skipped = Vec::new();

    for entity_ref in source.list_entities()? {
        match source.read_expiry(&entity_ref.certificate_path) {
            Ok(expiry) => entities.push(Entity {
                id: entity_ref.id,
                expiry,
            }),
            Err(e) => {
                let reason = match e {
                    MonitorError::CertificateRead { .. } | MonitorError::Io(_) => {
                        SkipReason::Unreadable
                    }
                    _ => SkipReason::Unparsable,
                };
                warn!(entity = %entity_ref.id, ?reason, "Skipping entity: {}", e);
                skipped.push(SkippedEntity {
                    id: entity_ref.id,
                    reason,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok((entities, skipped))
}
