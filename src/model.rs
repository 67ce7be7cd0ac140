use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Registry hive a registration write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryRoot {
    ClassesRoot,
    CurrentUser,
    LocalMachine,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryValueKind {
    String,
    ExpandString,
    MultiString,
    Binary,
    Integer,
}

/// One side-effect write observed while a module registered itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationEntry {
    pub root: RegistryRoot,
    pub key: String,
    pub name: Option<String>, // None = default value of the key
    pub value: String,
    pub kind: RegistryValueKind,
}

impl RegistrationEntry {
    pub fn new(
        root: RegistryRoot,
        key: impl Into<String>,
        name: Option<String>,
        value: impl Into<String>,
        kind: RegistryValueKind,
    ) -> Self {
        Self {
            root,
            key: key.into(),
            name,
            value: value.into(),
            kind,
        }
    }
}

/// Named unit of authoring data handed to the downstream compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: Option<String>,
    pub children: Vec<FragmentElement>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: FragmentElement) {
        self.children.push(element);
    }

    pub fn payloads(&self) -> impl Iterator<Item = &Payload> {
        self.children.iter().filter_map(|c| match c {
            FragmentElement::Payload(p) => Some(p),
            _ => None,
        })
    }

    pub fn registry_values(&self) -> impl Iterator<Item = &RegistrationEntry> {
        self.children.iter().filter_map(|c| match c {
            FragmentElement::RegistryValue(r) => Some(r),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum FragmentElement {
    Payload(Payload),
    RegistryValue(RegistrationEntry),
}

/// A file delivered during installation, hosted at `download_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub id: String,
    /// Path relative to the harvested root, in host separator form.
    pub name: String,
    pub download_url: String,
    pub remote_payload: RemotePayload,
}

/// Metadata for a payload fetched at install time instead of embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePayload {
    pub size: u64,
    /// Uppercase hex SHA-256 of the file contents
    pub hash: String,
    pub description: Option<String>,
    pub product_name: Option<String>,
    pub version: Option<String>,
}

/// Input record for the multi-package native build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupPackageDescriptor {
    pub source_path: PathBuf,
    pub privileged: bool,
    pub cache: bool,
}

impl SetupPackageDescriptor {
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            privileged: false,
            cache: true,
        }
    }
}
