// The engine is generic over the session's byte streams, so the server side
// of each test is a pre-recorded script: the dialogue is deterministic and
// the engine only ever reads as far as it got. Assertions run against the
// commands the engine wrote and the directory it mutated.

use std::{fs, io, os::unix::fs::symlink, path};

pub fn script(lines: &[&str]) -> Vec<u8> {
  let mut bytes = Vec::new();
  for line in lines {
    bytes.extend_from_slice(line.as_bytes());
    bytes.extend_from_slice(b"\r\n");
  }
  bytes
}

pub struct Runner {
  directory: tempfile::TempDir,
}

impl Runner {
  pub fn new() -> anyhow::Result<Self> {
    let runner = Self {
      directory: tempfile::tempdir()?,
    };
    for (name, line) in [
      (".username", "user"),
      (".password", "password"),
      (".mailbox", "INBOX"),
    ] {
      runner.store().create(name, line)?;
    }
    Ok(runner)
  }

  pub fn path(&self) -> &path::Path {
    self.directory.path()
  }

  pub fn store(&self) -> mhsync::store::Store {
    mhsync::store::Store::new(self.path())
  }

  pub fn write(&self, name: &str, contents: &str) -> anyhow::Result<()> {
    fs::write(self.path().join(name), contents)?;
    Ok(())
  }

  pub fn symlink(&self, name: &str, target: &str) -> anyhow::Result<()> {
    symlink(self.path().join(target), self.path().join(name))?;
    Ok(())
  }

  pub fn read(&self, name: &str) -> anyhow::Result<String> {
    Ok(fs::read_to_string(self.path().join(name))?)
  }

  pub fn exists(&self, name: &str) -> bool {
    // Also true for a dangling symlink.
    fs::symlink_metadata(self.path().join(name)).is_ok()
  }

  pub fn entries(&self) -> anyhow::Result<Vec<String>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(self.path())? {
      entries.push(entry?.file_name().to_string_lossy().into_owned());
    }
    entries.sort();
    Ok(entries)
  }

  pub fn download(&self, script: &[u8]) -> (anyhow::Result<()>, String) {
    let mut commands = Vec::new();
    let result = mhsync::sync::download::run(
      &mut mhsync::imap::Stream::new(io::Cursor::new(script.to_vec()), &mut commands),
      &self.store(),
    );
    (result, String::from_utf8_lossy(&commands).into_owned())
  }

  pub fn update(&self, script: &[u8]) -> (anyhow::Result<()>, String) {
    let mut commands = Vec::new();
    let result = mhsync::sync::update::run(
      &mut mhsync::imap::Stream::new(io::Cursor::new(script.to_vec()), &mut commands),
      &self.store(),
    );
    (result, String::from_utf8_lossy(&commands).into_owned())
  }

  pub fn idle(&self, script: &[u8]) -> (anyhow::Result<()>, String) {
    let mut commands = Vec::new();
    let result = mhsync::sync::idle::run(
      &mut mhsync::imap::Stream::new(io::Cursor::new(script.to_vec()), &mut commands),
      &self.store(),
    );
    (result, String::from_utf8_lossy(&commands).into_owned())
  }
}
