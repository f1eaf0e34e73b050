use crate::{imap, store, sync};
use anyhow::Context as _;
use std::io;

// https://www.rfc-editor.org/rfc/rfc2177
// The IDLE command is sent from the client to the server when the client is ready to accept
// unsolicited mailbox update messages. The server requests a response to the IDLE command using
// the continuation ("+") response.

/// Single-shot: once the server announces new mail with an EXISTS, the IDLE
/// is terminated and the process exits so a supervisor can run an update.
pub fn run<R, W>(stream: &mut imap::Stream<R, W>, store: &store::Store) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  let credentials = sync::Credentials::read(store)?;

  sync::greetings(stream)?;
  sync::login(stream, &credentials)?;
  sync::select_plain(stream, &credentials.mailbox)?;

  let command: &[&[u8]] = &[b"idle IDLE\r\n"];
  stream.input(command, command.len())?;
  loop {
    let line = stream.read_line()?;
    if imap::parser::continuation(&line).is_ok() {
      break;
    }
    if let Ok((position, tag)) = imap::parser::start(&line) {
      if tag == b"idle" {
        // A completion before the continuation means the server turned
        // IDLE down.
        sync::completed(&line[position..]).context("couldn't idle")?;
        anyhow::bail!("IDLE completed before DONE");
      }
    }
  }

  loop {
    let line = stream.read_line()?;
    if let Ok((position, b"*")) = imap::parser::start(&line) {
      if let Ok(imap::Select::Exists(messages)) = imap::parser::select_data(&line[position..]) {
        log::info!("{messages} message(s) on the server");
        break;
      }
    }
  }

  let command: &[&[u8]] = &[b"DONE\r\n"];
  stream.input(command, command.len())?;
  loop {
    let line = stream.read_line()?;
    match imap::parser::start(&line) {
      Ok((position, tag)) if tag == b"idle" => {
        sync::completed(&line[position..]).context("couldn't finish IDLE")?;
        break;
      }
      _ => (),
    }
  }

  sync::logout(stream);
  Ok(())
}
