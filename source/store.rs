// One flat directory per mailbox, MH style: a message is a regular file
// named .<uid>, an external indexer may add <uid> symlinks pointing at it,
// and the remaining dotfiles are single-line state. The directory is the
// only shared state so every mutation relies on the atomicity of a single
// create-exclusive, unlink or rename.

use crate::imap;
use anyhow::Context as _;
use std::{
  fs,
  io::{self, BufRead as _, Write as _},
  os::unix::fs::OpenOptionsExt as _,
  path,
};

const QRESYNC: &str = ".qresync";
const HIGHESTMODSEQ: &str = ".highestmodseq";

// Written once by init, never mutated afterwards.
pub const CREDENTIALS: [&str; 3] = [".username", ".password", ".mailbox"];

#[derive(Debug)]
pub struct Store {
  path: path::PathBuf,
}

impl Store {
  pub fn new(path: &path::Path) -> Self {
    Self {
      path: path.to_path_buf(),
    }
  }

  pub fn path(&self) -> &path::Path {
    self.path.as_path()
  }

  pub fn is_empty(&self) -> anyhow::Result<bool> {
    self.is_empty_except(&[])
  }

  pub fn is_empty_except_credentials(&self) -> anyhow::Result<bool> {
    self.is_empty_except(&CREDENTIALS)
  }

  fn is_empty_except(&self, allowed: &[&str]) -> anyhow::Result<bool> {
    for entry in self.entries()? {
      let name = entry?.file_name();
      if !allowed.iter().any(|allowed| name == *allowed) {
        return Ok(false);
      }
    }
    Ok(true)
  }

  fn entries(&self) -> anyhow::Result<fs::ReadDir> {
    fs::read_dir(&self.path).with_context(|| format!("couldn't open {:?}", self.path))
  }

  /// The first line of a state dotfile, without its terminator.
  pub fn read_line(&self, name: &str) -> anyhow::Result<String> {
    let path = self.path.join(name);
    let file = fs::File::open(&path).with_context(|| format!("couldn't open {path:?}"))?;
    let mut line = String::new();
    let read = io::BufReader::new(file)
      .read_line(&mut line)
      .with_context(|| format!("couldn't read {path:?}"))?;
    anyhow::ensure!(read > 0, "{path:?} is empty");
    while line.ends_with('\n') || line.ends_with('\r') {
      line.pop();
    }
    Ok(line)
  }

  pub fn read_number(&self, name: &str) -> anyhow::Result<u64> {
    let line = self.read_line(name)?;
    anyhow::ensure!(
      !line.is_empty() && line.bytes().all(|byte| byte.is_ascii_digit()),
      "invalid {name} {line:?}"
    );
    line
      .parse()
      .with_context(|| format!("couldn't parse {name} {line:?}"))
  }

  fn create_file(&self, name: &str) -> anyhow::Result<fs::File> {
    let path = self.path.join(name);
    fs::OpenOptions::new()
      .write(true)
      .create_new(true)
      .mode(0o600)
      .open(&path)
      .with_context(|| format!("couldn't create {path:?}"))
  }

  /// Exclusive single-line state write: an existing file is an error, never
  /// overwritten.
  pub fn create(&self, name: &str, line: &str) -> anyhow::Result<()> {
    let mut file = self.create_file(name)?;
    file.write_all(line.as_bytes())?;
    file.sync_all()?;
    Ok(())
  }

  pub fn message_exists(&self, uid: u64) -> bool {
    self.path.join(format!(".{uid}")).exists()
  }

  pub fn message_writer(&self, uid: u64) -> anyhow::Result<MessageWriter> {
    Ok(MessageWriter {
      file: io::BufWriter::new(self.create_file(&format!(".{uid}"))?),
    })
  }

  /// Unlinks every message whose UID falls in the (verbatim) vanished set.
  pub fn remove_messages_in(&self, set: &str) -> anyhow::Result<()> {
    for entry in self.entries()? {
      let entry = entry?;
      if let Some(uid) = message_uid(&entry.file_name()) {
        if imap::contains(set.as_bytes(), uid) {
          log::debug!("{uid} vanished in {set}");
          fs::remove_file(entry.path())
            .with_context(|| format!("couldn't remove {:?}", entry.path()))?;
        }
      }
    }
    Ok(())
  }

  /// Drops the symlinks an external indexer may have left so it reindexes
  /// from the message files. An all-digit name that is not a symlink means
  /// the directory holds something this engine never wrote.
  pub fn remove_symlinks(&self) -> anyhow::Result<()> {
    for entry in self.entries()? {
      let entry = entry?;
      let name = entry.file_name();
      match name.to_str() {
        Some(name) if !name.is_empty() && name.bytes().all(|byte| byte.is_ascii_digit()) => {
          let path = entry.path();
          let metadata = fs::symlink_metadata(&path)?;
          anyhow::ensure!(
            metadata.file_type().is_symlink(),
            "{path:?} is not a symlink"
          );
          fs::remove_file(&path).with_context(|| format!("couldn't remove {path:?}"))?;
        }
        _ => (),
      }
    }
    Ok(())
  }

  /// Write-then-rename so a crash can't leave the file missing.
  pub fn replace_highestmodseq(&self, highestmodseq: u64) -> anyhow::Result<()> {
    let temporary = self.path.join(".highestmodseq.new");
    let mut file = fs::OpenOptions::new()
      .write(true)
      .create(true)
      .truncate(true)
      .mode(0o600)
      .open(&temporary)
      .with_context(|| format!("couldn't create {temporary:?}"))?;
    file.write_all(highestmodseq.to_string().as_bytes())?;
    file.sync_all()?;
    fs::rename(&temporary, self.path.join(HIGHESTMODSEQ))
      .with_context(|| format!("couldn't rename {temporary:?}"))?;
    Ok(())
  }

  pub fn qresync_exists(&self) -> bool {
    self.path.join(QRESYNC).exists()
  }

  pub fn create_qresync(&self) -> anyhow::Result<QresyncLog> {
    Ok(QresyncLog {
      file: io::BufWriter::new(self.create_file(QRESYNC)?),
    })
  }

  /// Re-opens the staging log. Each reconciliation pass re-reads it from
  /// the start and independently decides what work remains, which is what
  /// makes an interrupted run resumable.
  pub fn qresync_records(&self) -> anyhow::Result<Records> {
    let path = self.path.join(QRESYNC);
    let file = fs::File::open(&path).with_context(|| format!("couldn't open {path:?}"))?;
    Ok(Records {
      lines: io::BufReader::new(file).lines(),
    })
  }

  pub fn remove_qresync(&self) -> anyhow::Result<()> {
    fs::remove_file(self.path.join(QRESYNC)).with_context(|| format!("couldn't remove {QRESYNC}"))
  }
}

/// `.<uid>` with at least one digit, nothing else.
fn message_uid(name: &std::ffi::OsStr) -> Option<u64> {
  let name = name.to_str()?;
  let uid = name.strip_prefix('.')?;
  if uid.is_empty() || !uid.bytes().all(|byte| byte.is_ascii_digit()) {
    return None;
  }
  uid.parse().ok()
}

/// Streams a fetched message to its exclusive `.<uid>` file, rewriting the
/// wire's CR-LF terminators to LF. Length accounting stays with the caller:
/// the literal size refers to the bytes as received.
#[derive(Debug)]
pub struct MessageWriter {
  file: io::BufWriter<fs::File>,
}

impl MessageWriter {
  pub fn write_line(&mut self, line: &[u8]) -> anyhow::Result<()> {
    match line.strip_suffix(b"\r\n") {
      Some(line) => {
        self.file.write_all(line)?;
        self.file.write_all(b"\n")?;
      }
      None => self.file.write_all(line)?,
    }
    Ok(())
  }

  pub fn finish(self) -> anyhow::Result<()> {
    let file = self.file.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()?;
    Ok(())
  }
}

/// Append side of the staging log. `finish` syncs: the log is what makes a
/// run after a crash converge, it has to reach the disk before the
/// reconciliation passes act on it.
#[derive(Debug)]
pub struct QresyncLog {
  file: io::BufWriter<fs::File>,
}

impl QresyncLog {
  pub fn uidvalidity(&mut self, uidvalidity: u64) -> anyhow::Result<()> {
    writeln!(self.file, "uidvalidity {uidvalidity}")?;
    Ok(())
  }

  pub fn highestmodseq(&mut self, highestmodseq: u64) -> anyhow::Result<()> {
    writeln!(self.file, "highestmodseq {highestmodseq}")?;
    Ok(())
  }

  pub fn fetch(&mut self, uid: u64) -> anyhow::Result<()> {
    writeln!(self.file, "fetch {uid}")?;
    Ok(())
  }

  pub fn vanished(&mut self, set: &[u8]) -> anyhow::Result<()> {
    self.file.write_all(b"vanished ")?;
    self.file.write_all(set)?;
    self.file.write_all(b"\n")?;
    Ok(())
  }

  pub fn finish(self) -> anyhow::Result<()> {
    let file = self.file.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()?;
    Ok(())
  }
}

#[derive(Debug, PartialEq)]
pub enum Record {
  UIDValidity(u64),
  HighestModSeq(u64),
  Fetch(u64),
  Vanished(String),
}

pub struct Records {
  lines: io::Lines<io::BufReader<fs::File>>,
}

impl Iterator for Records {
  type Item = anyhow::Result<Record>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      match self.lines.next()? {
        Err(error) => return Some(Err(error.into())),
        Ok(line) => match parse_record(&line) {
          Some(record) => return Some(Ok(record)),
          None => log::debug!("ignoring {line:?} in {QRESYNC}"),
        },
      }
    }
  }
}

fn digits(value: &str) -> Option<u64> {
  if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
    return None;
  }
  value.parse().ok()
}

fn parse_record(line: &str) -> Option<Record> {
  if let Some(value) = line.strip_prefix("uidvalidity ") {
    return digits(value).map(Record::UIDValidity);
  }
  if let Some(value) = line.strip_prefix("highestmodseq ") {
    return digits(value).map(Record::HighestModSeq);
  }
  if let Some(value) = line.strip_prefix("fetch ") {
    return digits(value).map(Record::Fetch);
  }
  if let Some(value) = line.strip_prefix("vanished ") {
    if !value.is_empty()
      && value
        .bytes()
        .all(|byte| byte.is_ascii_digit() || byte == b':' || byte == b',')
    {
      return Some(Record::Vanished(value.to_string()));
    }
  }
  None
}
