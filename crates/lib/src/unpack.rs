//! Archive unpacker for source tarballs.
//!
//! Supports plain `.tar` plus gzip, bzip2, xz and zstd compression. The format
//! is chosen from the file extension and, failing that, from the leading magic
//! bytes. Entries are validated before extraction so nothing lands outside the
//! destination directory.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::interrupt::{Interrupt, InterruptReason};
use crate::stage::confine::join_within;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
  None,
  Gzip,
  Bzip2,
  Xz,
  Zstd,
}

impl fmt::Display for Compression {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::None => "tar",
      Self::Gzip => "gzip",
      Self::Bzip2 => "bzip2",
      Self::Xz => "xz",
      Self::Zstd => "zstd",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Error)]
pub enum UnpackError {
  #[error("failed to open archive {path}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to create destination {path}: {source}")]
  Destination {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("unsupported archive format: {0}")]
  Unsupported(String),

  #[error("corrupt archive {path}: {message}")]
  Corrupt { path: PathBuf, message: String },

  #[error("path traversal detected: {entry}")]
  PathTraversal { entry: String },

  #[error("link '{entry}' points outside the destination: {target}")]
  LinkEscape { entry: String, target: String },

  #[error("extraction {0}")]
  Interrupted(InterruptReason),
}

const UNSUPPORTED_SUFFIXES: &[&str] = &[".zip", ".7z", ".rar", ".tar.lz", ".tar.lzma", ".tar.lz4", ".tar.lzo"];

impl Compression {
  /// Compression implied by the file name, if the name is recognised.
  pub fn from_file_name(name: &str) -> Result<Option<Self>, UnpackError> {
    let name = name.to_ascii_lowercase();
    if let Some(suffix) = UNSUPPORTED_SUFFIXES.iter().find(|s| name.ends_with(*s)) {
      return Err(UnpackError::Unsupported(suffix.trim_start_matches('.').to_string()));
    }
    let found = if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
      Some(Self::Gzip)
    } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
      Some(Self::Bzip2)
    } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
      Some(Self::Xz)
    } else if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
      Some(Self::Zstd)
    } else if name.ends_with(".tar") {
      Some(Self::None)
    } else {
      None
    };
    Ok(found)
  }

  /// Compression identified by the first bytes of the file.
  pub fn sniff(header: &[u8]) -> Option<Self> {
    if header.starts_with(&[0x1f, 0x8b]) {
      Some(Self::Gzip)
    } else if header.starts_with(b"BZh") {
      Some(Self::Bzip2)
    } else if header.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
      Some(Self::Xz)
    } else if header.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
      Some(Self::Zstd)
    } else if header.len() >= 262 && &header[257..262] == b"ustar" {
      Some(Self::None)
    } else {
      None
    }
  }

  pub fn detect(path: &Path) -> Result<Self, UnpackError> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    if let Some(found) = Self::from_file_name(&name)? {
      return Ok(found);
    }

    let mut header = Vec::with_capacity(512);
    File::open(path)
      .and_then(|file| file.take(512).read_to_end(&mut header))
      .map_err(|source| UnpackError::Open {
        path: path.to_path_buf(),
        source,
      })?;
    Self::sniff(&header).ok_or_else(|| UnpackError::Unsupported(format!("unrecognised archive '{name}'")))
  }
}

/// Extracts `archive` into `dest`, creating `dest` if needed.
///
/// Returns the number of entries extracted. Permission bits and mtimes are
/// preserved; ownership is not.
pub fn unpack(archive: &Path, dest: &Path, interrupt: Option<&Interrupt>) -> Result<usize, UnpackError> {
  let compression = Compression::detect(archive)?;
  fs::create_dir_all(dest).map_err(|source| UnpackError::Destination {
    path: dest.to_path_buf(),
    source,
  })?;
  let dest = dunce::canonicalize(dest).map_err(|source| UnpackError::Destination {
    path: dest.to_path_buf(),
    source,
  })?;

  let file = File::open(archive).map_err(|source| UnpackError::Open {
    path: archive.to_path_buf(),
    source,
  })?;
  let corrupt = |e: io::Error| UnpackError::Corrupt {
    path: archive.to_path_buf(),
    message: e.to_string(),
  };

  let reader: Box<dyn Read> = match compression {
    Compression::None => Box::new(BufReader::new(file)),
    Compression::Gzip => Box::new(flate2::read::GzDecoder::new(BufReader::new(file))),
    Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(BufReader::new(file))),
    Compression::Xz => Box::new(xz2::read::XzDecoder::new(BufReader::new(file))),
    Compression::Zstd => Box::new(zstd::stream::read::Decoder::new(file).map_err(corrupt)?),
  };

  let mut tar = tar::Archive::new(reader);
  tar.set_preserve_permissions(true);
  tar.set_preserve_mtime(true);
  tar.set_overwrite(true);

  let mut count = 0usize;
  for entry in tar.entries().map_err(corrupt)? {
    if let Some(reason) = interrupt.and_then(Interrupt::reason) {
      return Err(UnpackError::Interrupted(reason));
    }
    let mut entry = entry.map_err(corrupt)?;
    let entry_path = entry.path().map_err(corrupt)?.into_owned();
    validate_entry_path(&entry_path)?;
    validate_link(&entry, &entry_path).map_err(|e| match e {
      LinkCheck::Io(io) => corrupt(io),
      LinkCheck::Escape(err) => err,
    })?;

    let unpacked = entry.unpack_in(&dest).map_err(corrupt)?;
    if !unpacked {
      return Err(UnpackError::PathTraversal {
        entry: entry_path.display().to_string(),
      });
    }
    count += 1;
  }

  debug!(archive = %archive.display(), %compression, entries = count, "unpacked");
  info!(archive = %archive.display(), dest = %dest.display(), "extracted archive");
  Ok(count)
}

/// Rejects absolute entry paths and any `..` component.
fn validate_entry_path(path: &Path) -> Result<(), UnpackError> {
  let traversal = path.has_root()
    || path
      .components()
      .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)));
  if traversal {
    return Err(UnpackError::PathTraversal {
      entry: path.display().to_string(),
    });
  }
  Ok(())
}

enum LinkCheck {
  Io(io::Error),
  Escape(UnpackError),
}

fn validate_link<R: Read>(entry: &tar::Entry<'_, R>, entry_path: &Path) -> Result<(), LinkCheck> {
  let Some(target) = entry.link_name().map_err(LinkCheck::Io)? else {
    return Ok(());
  };
  let escape = || {
    LinkCheck::Escape(UnpackError::LinkEscape {
      entry: entry_path.display().to_string(),
      target: target.display().to_string(),
    })
  };
  if target.has_root() {
    return Err(escape());
  }
  // Hard link names are archive-relative; symlink targets are relative to the entry's directory.
  let base = if entry.header().entry_type().is_hard_link() {
    PathBuf::new()
  } else {
    entry_path.parent().map(Path::to_path_buf).unwrap_or_default()
  };
  match join_within(Path::new(""), &base.join(&target)) {
    Some(_) => Ok(()),
    None => Err(escape()),
  }
}
