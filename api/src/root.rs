use serde::{Deserialize, Serialize};

// structs and types

pub type RootUuid = i64;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProtocol {
    Smb,
    Ftp,
    Nfs,
    Webdav,
    Local,
}

impl StorageProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageProtocol::Smb => "smb",
            StorageProtocol::Ftp => "ftp",
            StorageProtocol::Nfs => "nfs",
            StorageProtocol::Webdav => "webdav",
            StorageProtocol::Local => "local",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "smb" => Some(StorageProtocol::Smb),
            "ftp" => Some(StorageProtocol::Ftp),
            "nfs" => Some(StorageProtocol::Nfs),
            "webdav" => Some(StorageProtocol::Webdav),
            "local" => Some(StorageProtocol::Local),
            _ => None,
        }
    }
}

// a configured, mounted source location with its own protocol and credentials
//
// created by admin action, mutated by admin calls or the scanner (timestamps
// only), never destroyed automatically
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageRoot {
    pub name: String,
    pub settings: RootSettings,
    pub enabled: bool,

    // 0 means unlimited
    pub max_depth: u32,

    pub extract_metadata: bool,
    pub detect_duplicates: bool,

    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,

    pub last_scan: Option<i64>,
}

impl StorageRoot {
    pub fn protocol(&self) -> StorageProtocol {
        self.settings.protocol()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageRootUpdate {
    pub enabled: Option<bool>,
    pub max_depth: Option<u32>,
    pub extract_metadata: Option<bool>,
    pub detect_duplicates: Option<bool>,
    pub include_globs: Option<Vec<String>>,
    pub exclude_globs: Option<Vec<String>>,
}

// per-protocol connection settings
//
// these records are stored as a json column on the storage_roots table, and
// the tag doubles as the protocol discriminator for the client factory
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum RootSettings {
    Smb(SmbSettings),
    Ftp(FtpSettings),
    Nfs(NfsSettings),
    Webdav(WebdavSettings),
    Local(LocalSettings),
}

impl RootSettings {
    pub fn protocol(&self) -> StorageProtocol {
        match self {
            RootSettings::Smb(_) => StorageProtocol::Smb,
            RootSettings::Ftp(_) => StorageProtocol::Ftp,
            RootSettings::Nfs(_) => StorageProtocol::Nfs,
            RootSettings::Webdav(_) => StorageProtocol::Webdav,
            RootSettings::Local(_) => StorageProtocol::Local,
        }
    }
}

fn default_smb_port() -> u16 {
    445
}

fn default_ftp_port() -> u16 {
    21
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmbSettings {
    pub host: String,

    #[serde(default = "default_smb_port")]
    pub port: u16,

    pub share: String,

    pub username: Option<String>,
    pub password: Option<String>,
    pub domain: Option<String>,
    pub workgroup: Option<String>,

    #[serde(default)]
    pub use_krb5: bool,

    #[serde(default = "default_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub read_timeout_ms: u64,

    // where the kernel cifs mount for this share is expected
    pub mount_point: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FtpSettings {
    pub host: String,

    #[serde(default = "default_ftp_port")]
    pub port: u16,

    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default)]
    pub use_tls: bool,

    #[serde(default = "default_true")]
    pub passive_mode: bool,

    #[serde(default = "default_timeout_ms")]
    pub connection_timeout_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NfsSettings {
    pub host: String,
    pub export_path: String,

    #[serde(default)]
    pub mount_options: String,

    // 3 or 4
    pub version: u8,

    // where the kernel nfs mount for this export is expected
    pub mount_point: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebdavAuthScheme {
    Basic,
    Digest,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebdavSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,

    pub auth_scheme: WebdavAuthScheme,

    #[serde(default = "default_true")]
    pub tls_verify: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalSettings {
    pub base_path: String,

    #[serde(default)]
    pub follow_symlinks: bool,
}
