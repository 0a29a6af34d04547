//! Locations on either side of the remote boundary
//!
//! A [`Location`] is a URL-like value: `sftp://user@host:port/path` for the
//! remote tree, `file:///path` for the local filesystem. Directory-ness is an
//! explicit bit, a trailing separator is only the textual convention.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::SftpError;
use super::path_utils::{
    has_dot_segments, is_absolute_remote_path, join_remote_path, normalize_remote_path,
    remote_file_name, remote_parent,
};

/// Default SSH port, used when a location does not carry one
pub const DEFAULT_SFTP_PORT: u16 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Sftp,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    scheme: Scheme,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    path: String,
    is_dir: bool,
}

impl Location {
    /// Remote location; the path is normalized, `.` and `..` included
    pub fn remote(
        host: impl Into<String>,
        port: Option<u16>,
        user: Option<String>,
        path: &str,
        is_dir: bool,
    ) -> Self {
        let path = normalize_remote_path(path);
        Self {
            scheme: Scheme::Sftp,
            host: Some(host.into()),
            port,
            user,
            is_dir: is_dir || path == "/",
            path,
        }
    }

    /// Local filesystem location
    pub fn local(path: impl AsRef<Path>, is_dir: bool) -> Self {
        Self {
            scheme: Scheme::File,
            host: None,
            port: None,
            user: None,
            path: path.as_ref().to_string_lossy().to_string(),
            is_dir,
        }
    }

    /// Parse `sftp://[user@]host[:port]/path`, `file:///path` or a bare
    /// absolute local path. A trailing `/` marks a directory.
    pub fn parse(text: &str) -> Result<Self, SftpError> {
        let invalid = || SftpError::InvalidLocation(text.to_string());
        let is_dir = text.ends_with('/');

        if let Some(rest) = text.strip_prefix("sftp://") {
            let (authority, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, "/"),
            };
            let (user, host_port) = match authority.rsplit_once('@') {
                Some((user, host_port)) => (Some(user.to_string()), host_port),
                None => (None, authority),
            };
            let (host, port) = split_host_port(host_port).ok_or_else(invalid)?;
            if host.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::remote(host, port, user, path, is_dir));
        }

        let local = text.strip_prefix("file://").unwrap_or(text);
        if Path::new(local).is_absolute() || local.starts_with('/') {
            Ok(Self::local(local, is_dir))
        } else {
            Err(invalid())
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn is_remote(&self) -> bool {
        self.scheme == Scheme::Sftp
    }

    pub fn is_local(&self) -> bool {
        self.scheme == Scheme::File
    }

    /// The same location with its directory bit replaced
    pub fn with_dir(mut self, is_dir: bool) -> Self {
        self.is_dir = is_dir || (self.is_remote() && self.path == "/");
        self
    }

    /// Filesystem path for local locations
    pub fn local_path(&self) -> Option<PathBuf> {
        self.is_local().then(|| PathBuf::from(&self.path))
    }

    pub fn file_name(&self) -> Option<String> {
        match self.scheme {
            Scheme::Sftp => remote_file_name(&self.path).map(str::to_string),
            Scheme::File => Path::new(&self.path)
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
        }
    }

    pub fn parent(&self) -> Option<Location> {
        let path = match self.scheme {
            Scheme::Sftp => remote_parent(&self.path)?,
            Scheme::File => Path::new(&self.path)
                .parent()?
                .to_string_lossy()
                .to_string(),
        };
        Some(Self {
            path,
            is_dir: true,
            ..self.clone()
        })
    }

    /// Child location named `name`
    pub fn join(&self, name: &str, is_dir: bool) -> Location {
        let path = match self.scheme {
            Scheme::Sftp => normalize_remote_path(&join_remote_path(&self.path, name)),
            Scheme::File => Path::new(&self.path)
                .join(name)
                .to_string_lossy()
                .to_string(),
        };
        Self {
            path,
            is_dir,
            ..self.clone()
        }
    }

    /// Sibling location with the last component replaced
    pub fn with_file_name(&self, name: &str) -> Location {
        match self.parent() {
            Some(parent) => parent.join(name, self.is_dir),
            None => self.clone(),
        }
    }
}

fn split_host_port(host_port: &str) -> Option<(String, Option<u16>)> {
    // [v6]:port
    if let Some(rest) = host_port.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(port.parse().ok()?),
            None if tail.is_empty() => None,
            None => return None,
        };
        return Some((host.to_string(), port));
    }
    match host_port.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), Some(port.parse().ok()?))),
        None => Some((host_port.to_string(), None)),
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Sftp => {
                write!(f, "sftp://")?;
                if let Some(user) = &self.user {
                    write!(f, "{}@", user)?;
                }
                let host = self.host.as_deref().unwrap_or_default();
                if host.contains(':') {
                    write!(f, "[{}]", host)?;
                } else {
                    write!(f, "{}", host)?;
                }
                if let Some(port) = self.port {
                    write!(f, ":{}", port)?;
                }
                if !is_absolute_remote_path(&self.path) {
                    write!(f, "/")?;
                }
                write!(f, "{}", self.path)?;
            }
            Scheme::File => write!(f, "file://{}", self.path)?,
        }
        if self.is_dir && !self.path.ends_with('/') && !self.path.ends_with('\\') {
            write!(f, "/")?;
        }
        Ok(())
    }
}

/// Boundary of one filesystem instance's tree. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRoot {
    name: String,
    /// Root path, always ending in `/`
    base_path: String,
    location: Location,
}

impl RemoteRoot {
    pub fn new(name: impl Into<String>, location: Location) -> Result<Self, SftpError> {
        let root_init = |reason: &str| SftpError::RootInit {
            root: location.to_string(),
            reason: reason.to_string(),
        };
        if !location.is_remote() {
            return Err(root_init("root must be an sftp location"));
        }
        if location.host().map_or(true, str::is_empty) {
            return Err(root_init("root has no host"));
        }
        if !is_absolute_remote_path(location.path()) {
            return Err(root_init("root path must be absolute"));
        }

        let location = location.with_dir(true);
        let base_path = if location.path() == "/" {
            "/".to_string()
        } else {
            format!("{}/", location.path())
        };

        Ok(Self {
            name: name.into(),
            base_path,
            location,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Whether `location` is the root or one of its descendants.
    ///
    /// Compared structurally: scheme, host, effective port, user (when both
    /// carry one) and path prefix on component boundaries. A path that
    /// still carries `.` or `..` segments is never inside.
    pub fn contains(&self, location: &Location) -> bool {
        if location.scheme() != Scheme::Sftp || has_dot_segments(location.path()) {
            return false;
        }

        let same_host = match (self.location.host(), location.host()) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        };
        let same_port = self.location.port().unwrap_or(DEFAULT_SFTP_PORT)
            == location.port().unwrap_or(DEFAULT_SFTP_PORT);
        let same_user = match (self.location.user(), location.user()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        if !(same_host && same_port && same_user) {
            return false;
        }

        let path = location.path();
        let with_separator;
        let path = if path.ends_with('/') {
            path
        } else {
            with_separator = format!("{}/", path);
            &with_separator
        };
        path.starts_with(&self.base_path)
    }
}
