//  Copyright 2020, The Tari Project
//
//  Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
//  following conditions are met:
//
//  1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
//  disclaimer.
//
//  2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
//  following disclaimer in the documentation and/or other materials provided with the distribution.
//
//  3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
//  products derived from this software without specific prior written permission.
//
//  THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
//  INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
//  DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
//  SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
//  SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
//  WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
//  USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use data_encoding::BASE64;
use log::*;
use thiserror::Error;

use super::NseRegistration;

const LOG_TARGET: &str = "nsm::registry::file";

const CLIENT_RECORD: &str = "CLE";
const NSE_RECORD: &str = "NSE";

#[derive(Debug, Error)]
pub enum RegistryFileError {
    #[error("Registry file IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to encode NSE registration: {0}")]
    Encode(#[from] serde_json::Error),
}

/// An NSE registration replayed on restart together with the client workspace that registered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NseEntry {
    pub workspace: String,
    pub registration: NseRegistration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryRecords {
    pub clients: Vec<String>,
    /// Keyed by endpoint name
    pub nses: BTreeMap<String, NseEntry>,
}

/// Append-only file of granted client workspaces and NSE registrations. Deletions rewrite the file through a
/// temporary file which is renamed over the original.
#[derive(Debug)]
pub struct NseRegistryFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NseRegistryFile {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_client_request(&self, workspace: &str) -> Result<(), RegistryFileError> {
        let _guard = acquire_lock!(self.lock);
        self.append_line(&[CLIENT_RECORD, workspace])
    }

    pub fn append_nse_registration(
        &self,
        workspace: &str,
        registration: &NseRegistration,
    ) -> Result<(), RegistryFileError>
    {
        let encoded = encode_registration(registration)?;
        let _guard = acquire_lock!(self.lock);
        self.append_line(&[NSE_RECORD, registration.endpoint_name(), workspace, &encoded])
    }

    pub fn delete_nse(&self, endpoint_name: &str) -> Result<(), RegistryFileError> {
        let _guard = acquire_lock!(self.lock);
        let mut records = self.read_records()?;
        records.nses.remove(endpoint_name);
        self.save(&records)
    }

    /// Remove a client workspace together with every NSE registered from it.
    pub fn delete_client(&self, workspace: &str) -> Result<(), RegistryFileError> {
        let _guard = acquire_lock!(self.lock);
        let mut records = self.read_records()?;
        records.clients.retain(|ws| ws != workspace);
        records.nses.retain(|_, entry| entry.workspace != workspace);
        self.save(&records)
    }

    /// Load all records. A missing file yields no records.
    pub fn load_registry(&self) -> Result<RegistryRecords, RegistryFileError> {
        let _guard = acquire_lock!(self.lock);
        self.read_records()
    }

    pub fn delete(&self) -> Result<(), RegistryFileError> {
        let _guard = acquire_lock!(self.lock);
        match fs::remove_file(&self.path) {
            Ok(_) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn append_line(&self, fields: &[&str]) -> Result<(), RegistryFileError> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", join_fields(fields))?;
        file.sync_all()?;
        Ok(())
    }

    fn save(&self, records: &RegistryRecords) -> Result<(), RegistryFileError> {
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push("_tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut file = File::create(&tmp_path)?;
        for workspace in &records.clients {
            writeln!(file, "{}", join_fields(&[CLIENT_RECORD, workspace]))?;
        }
        for (endpoint_name, entry) in &records.nses {
            let encoded = encode_registration(&entry.registration)?;
            writeln!(
                file,
                "{}",
                join_fields(&[NSE_RECORD, endpoint_name, &entry.workspace, &encoded])
            )?;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn read_records(&self) -> Result<RegistryRecords, RegistryFileError> {
        let mut records = RegistryRecords::default();
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(target: LOG_TARGET, "No registry file at '{}'", self.path.display());
                return Ok(records);
            },
            Err(err) => return Err(err.into()),
        };

        for line in BufReader::new(file).lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let fields = split_fields(trimmed);
            match fields.as_slice() {
                [kind, workspace] if kind == CLIENT_RECORD => {
                    records.clients.push(workspace.clone());
                },
                [kind, endpoint_name, workspace, encoded] if kind == NSE_RECORD => {
                    match decode_registration(encoded) {
                        Some(registration) => {
                            records.nses.insert(endpoint_name.clone(), NseEntry {
                                workspace: workspace.clone(),
                                registration,
                            });
                        },
                        None => {
                            error!(
                                target: LOG_TARGET,
                                "Failed to decode NSE registration for endpoint '{}'", endpoint_name
                            );
                        },
                    }
                },
                _ => {
                    error!(target: LOG_TARGET, "Unknown registry file line: {}", trimmed);
                },
            }
        }

        debug!(
            target: LOG_TARGET,
            "Loaded {} client(s) and {} NSE(s) from registry file",
            records.clients.len(),
            records.nses.len()
        );
        Ok(records)
    }
}

fn encode_registration(registration: &NseRegistration) -> Result<String, RegistryFileError> {
    let bytes = serde_json::to_vec(registration)?;
    Ok(BASE64.encode(&bytes))
}

fn decode_registration(encoded: &str) -> Option<NseRegistration> {
    let bytes = BASE64.decode(encoded.as_bytes()).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn join_fields(fields: &[&str]) -> String {
    fields.iter().map(|f| escape(f)).collect::<Vec<_>>().join("\t")
}

fn split_fields(line: &str) -> Vec<String> {
    line.split('\t').map(unescape).collect()
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod test {
    use nsm_test_utils::paths::with_temp_dir;

    use super::*;
    use crate::registry::{NetworkService, NetworkServiceEndpoint, NetworkServiceManager};

    fn registration(endpoint: &str) -> NseRegistration {
        NseRegistration {
            network_service: NetworkService {
                name: "secure-intranet".to_string(),
                ..Default::default()
            },
            network_service_manager: NetworkServiceManager {
                name: "nsm-1".to_string(),
                ..Default::default()
            },
            network_service_endpoint: NetworkServiceEndpoint {
                name: endpoint.to_string(),
                network_service_name: "secure-intranet".to_string(),
                network_service_manager_name: "nsm-1".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn missing_file_is_empty() {
        with_temp_dir(|dir| {
            let registry = NseRegistryFile::new(dir.join("registry"));
            assert_eq!(registry.load_registry().unwrap(), RegistryRecords::default());
            registry.delete().unwrap();
        });
    }

    #[test]
    fn append_and_load() {
        with_temp_dir(|dir| {
            let registry = NseRegistryFile::new(dir.join("registry"));
            registry.append_client_request("ws-1").unwrap();
            registry.append_client_request("ws-2").unwrap();
            registry.append_nse_registration("ws-1", &registration("nse-a")).unwrap();
            registry.append_nse_registration("ws-2", &registration("nse-b")).unwrap();

            let records = registry.load_registry().unwrap();
            assert_eq!(records.clients, vec!["ws-1", "ws-2"]);
            assert_eq!(records.nses.len(), 2);
            assert_eq!(records.nses["nse-a"].workspace, "ws-1");
            assert_eq!(records.nses["nse-b"].registration, registration("nse-b"));
        });
    }

    #[test]
    fn delete_client_removes_its_nses() {
        with_temp_dir(|dir| {
            let registry = NseRegistryFile::new(dir.join("registry"));
            registry.append_client_request("ws-1").unwrap();
            registry.append_client_request("ws-2").unwrap();
            registry.append_nse_registration("ws-1", &registration("nse-a")).unwrap();
            registry.append_nse_registration("ws-2", &registration("nse-b")).unwrap();

            registry.delete_client("ws-1").unwrap();
            let records = registry.load_registry().unwrap();
            assert_eq!(records.clients, vec!["ws-2"]);
            assert!(!records.nses.contains_key("nse-a"));
            assert!(records.nses.contains_key("nse-b"));

            registry.delete_nse("nse-b").unwrap();
            assert!(registry.load_registry().unwrap().nses.is_empty());

            registry.delete().unwrap();
            assert!(!registry.path().exists());
        });
    }

    #[test]
    fn fields_with_separators_survive() {
        with_temp_dir(|dir| {
            let registry = NseRegistryFile::new(dir.join("registry"));
            registry.append_client_request("odd\tworkspace\nname\\").unwrap();
            let records = registry.load_registry().unwrap();
            assert_eq!(records.clients, vec!["odd\tworkspace\nname\\"]);
        });
    }

    #[test]
    fn unknown_lines_are_skipped() {
        with_temp_dir(|dir| {
            let path = dir.join("registry");
            fs::write(&path, "BOGUS\tline\nCLE\tws-1\nNSE\tnse-a\tws-1\tnot-base64\n").unwrap();
            let records = NseRegistryFile::new(path).load_registry().unwrap();
            assert_eq!(records.clients, vec!["ws-1"]);
            assert!(records.nses.is_empty());
        });
    }
}
