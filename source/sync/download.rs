use crate::{imap, store, sync};
use anyhow::Context as _;
use std::io;

/// The initial mirror: every message in the mailbox lands in an empty
/// directory, along with the UIDVALIDITY/HIGHESTMODSEQ baseline the next
/// update resynchronizes from.
pub fn run<R, W>(stream: &mut imap::Stream<R, W>, store: &store::Store) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  anyhow::ensure!(
    store.is_empty_except_credentials()?,
    "{:?} is not empty (excluding {})",
    store.path(),
    store::CREDENTIALS.join(" ")
  );
  let credentials = sync::Credentials::read(store)?;

  sync::greetings(stream)?;
  sync::login(stream, &credentials)?;
  sync::enable_qresync(stream)?;

  let command: &[&[u8]] = &[b"select SELECT ", credentials.mailbox.as_bytes(), b"\r\n"];
  stream.input(command, command.len())?;
  loop {
    let line = stream.read_line()?;
    match imap::parser::start(&line) {
      Ok((position, b"*")) => match imap::parser::select_data(&line[position..]) {
        // The baseline is written as the responses arrive, before the
        // SELECT even completes.
        Ok(imap::Select::UIDValidity(uidvalidity)) => {
          store.create(".uidvalidity", &uidvalidity.to_string())?
        }
        Ok(imap::Select::HighestModSeq(highestmodseq)) => {
          store.create(".highestmodseq", &highestmodseq.to_string())?
        }
        Ok(imap::Select::Exists(messages)) => log::info!("{messages} message(s) to download"),
        Ok(_) => (),
        Err(_) => log::debug!("ignoring {}", imap::escape(&line)),
      },
      Ok((position, tag)) if tag == b"select" => {
        sync::completed(&line[position..])
          .with_context(|| format!("couldn't select {}", credentials.mailbox))?;
        break;
      }
      Ok((_, tag)) => anyhow::bail!("unexpected tag {}", imap::escape(tag)),
      Err(_) => log::debug!("ignoring {}", imap::escape(&line)),
    }
  }

  sync::fetch(stream, store, "1:*")?;
  sync::logout(stream);
  Ok(())
}
