use crate::{imap, store};
use anyhow::Context as _;
use std::io;

pub mod download;
pub mod idle;
pub mod update;

/// The three single-line state files written by init. The password is wiped
/// from memory when the engine is done with the session.
#[derive(zeroize::Zeroize, zeroize::ZeroizeOnDrop)]
pub struct Credentials {
  pub username: String,
  pub password: String,
  pub mailbox: String,
}

impl Credentials {
  pub fn read(store: &store::Store) -> anyhow::Result<Self> {
    Ok(Self {
      username: store.read_line(".username")?,
      password: store.read_line(".password")?,
      mailbox: store.read_line(".mailbox")?,
    })
  }
}

fn completed(rest: &[u8]) -> anyhow::Result<()> {
  let (status, text) = imap::parser::condition(rest)
    .map_err(|_| anyhow::anyhow!("malformed completion {}", imap::escape(rest)))?;
  match status {
    imap::Status::Ok => Ok(()),
    status => anyhow::bail!("{status}{}", String::from_utf8_lossy(text)),
  }
}

// https://www.rfc-editor.org/rfc/rfc3501#section-7.1.4
// The PREAUTH response is always untagged, and is one of three possible greetings at connection
// startup.
//
// Only the OK greeting is accepted: PREAUTH isn't supported and BYE is a rejection.
pub fn greetings<R, W>(stream: &mut imap::Stream<R, W>) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  let line = stream.read_line()?;
  if let Ok((position, b"*")) = imap::parser::start(&line) {
    if let Ok((imap::Status::Ok, _)) = imap::parser::condition(&line[position..]) {
      return Ok(());
    }
  }
  anyhow::bail!("expected an OK greeting, received {}", imap::escape(&line));
}

pub fn login<R, W>(
  stream: &mut imap::Stream<R, W>,
  credentials: &Credentials,
) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  // Only the first two buffers reach the log: the password never does.
  let command: &[&[u8]] = &[
    b"login LOGIN ",
    credentials.username.as_bytes(),
    b" ",
    credentials.password.as_bytes(),
    b"\r\n",
  ];
  stream.input(command, 2)?;
  loop {
    let line = stream.read_line()?;
    match imap::parser::start(&line) {
      Ok((position, tag)) if tag == b"login" => {
        break completed(&line[position..]).context("couldn't log in")
      }
      Ok((_, b"*")) => (),
      Ok((_, tag)) => anyhow::bail!("unexpected tag {}", imap::escape(tag)),
      Err(_) => log::debug!("ignoring {}", imap::escape(&line)),
    }
  }
}

// https://www.rfc-editor.org/rfc/rfc7162#section-3.2.3
// A server compliant with this specification is REQUIRED to support "ENABLE QRESYNC" [...] A
// client making use of QRESYNC MUST issue "ENABLE QRESYNC" once it is authenticated.
pub fn enable_qresync<R, W>(stream: &mut imap::Stream<R, W>) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  let command: &[&[u8]] = &[b"qresync ENABLE QRESYNC\r\n"];
  stream.input(command, command.len())?;
  loop {
    let line = stream.read_line()?;
    match imap::parser::start(&line) {
      Ok((position, tag)) if tag == b"qresync" => {
        break completed(&line[position..]).context("couldn't enable QRESYNC")
      }
      Ok((_, b"*")) => (),
      Ok((_, tag)) => anyhow::bail!("unexpected tag {}", imap::escape(tag)),
      Err(_) => log::debug!("ignoring {}", imap::escape(&line)),
    }
  }
}

/// SELECT for the operations that don't reconcile: the untagged state data
/// is acknowledged and dropped.
pub fn select_plain<R, W>(stream: &mut imap::Stream<R, W>, mailbox: &str) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  let command: &[&[u8]] = &[b"select SELECT ", mailbox.as_bytes(), b"\r\n"];
  stream.input(command, command.len())?;
  loop {
    let line = stream.read_line()?;
    match imap::parser::start(&line) {
      Ok((position, tag)) if tag == b"select" => {
        break completed(&line[position..]).with_context(|| format!("couldn't select {mailbox}"))
      }
      Ok((_, b"*")) => (),
      Ok((_, tag)) => anyhow::bail!("unexpected tag {}", imap::escape(tag)),
      Err(_) => log::debug!("ignoring {}", imap::escape(&line)),
    }
  }
}

/// Issues `UID FETCH <set> RFC822` and materializes every returned message.
/// The caller must have ruled out collisions with existing message files.
pub fn fetch<R, W>(
  stream: &mut imap::Stream<R, W>,
  store: &store::Store,
  set: &str,
) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  let command: &[&[u8]] = &[b"fetch UID FETCH ", set.as_bytes(), b" RFC822\r\n"];
  stream.input(command, command.len())?;
  loop {
    let line = stream.read_line()?;
    match imap::parser::start(&line) {
      Ok((position, b"*")) => match imap::parser::fetch_message(&line[position..]) {
        Ok((uid, size)) => receive(stream, store, uid, size)?,
        // Unsolicited data without a literal, flag updates typically.
        Err(_) => log::debug!("ignoring {}", imap::escape(&line)),
      },
      Ok((position, tag)) if tag == b"fetch" => {
        break completed(&line[position..]).with_context(|| format!("couldn't fetch {set}"))
      }
      Ok((_, tag)) => anyhow::bail!("unexpected tag {}", imap::escape(tag)),
      Err(_) => log::debug!("ignoring {}", imap::escape(&line)),
    }
  }
}

// https://www.rfc-editor.org/rfc/rfc3501#section-4.3
// A literal is a sequence of zero or more octets (including CR and LF), prefix-quoted with an
// octet count [...].
//
// Length accounting happens on the lines as received, before the CR-LF rewrite; the message is
// durable before the closing line of the FETCH is consumed.
fn receive<R, W>(
  stream: &mut imap::Stream<R, W>,
  store: &store::Store,
  uid: u64,
  size: u64,
) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  log::debug!("fetching message {uid} ({size} byte(s))");
  let mut message = store.message_writer(uid)?;
  let mut read = 0;
  while read < size {
    let line = stream.read_literal_line(size - read)?;
    read += line.len() as u64;
    message.write_line(&line)?;
  }
  message.finish()?;
  let line = stream.read_line()?;
  anyhow::ensure!(
    line.ends_with(b")\r\n"),
    "expected the end of the FETCH of {uid}, received {}",
    imap::escape(&line)
  );
  Ok(())
}

/// By logout time all the useful work is durable: failures are reported and
/// swallowed.
pub fn logout<R, W>(stream: &mut imap::Stream<R, W>)
where
  R: io::Read,
  W: io::Write,
{
  if let Err(error) = inner_logout(stream) {
    log::warn!("couldn't log out: {error:#}");
  }
}

fn inner_logout<R, W>(stream: &mut imap::Stream<R, W>) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  let command: &[&[u8]] = &[b"logout LOGOUT\r\n"];
  stream.input(command, command.len())?;
  loop {
    let line = stream.read_line()?;
    match imap::parser::start(&line) {
      Ok((position, tag)) if tag == b"logout" => break completed(&line[position..]),
      // BYE, typically.
      _ => (),
    }
  }
}
