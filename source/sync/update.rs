use crate::{imap, store, sync};
use anyhow::Context as _;
use std::io;

// https://www.rfc-editor.org/rfc/rfc7162#section-3.2.5
// A server [...] returns to the client any changes to flags [...] and a list of messages
// expunged since the provided mod-sequence, via the VANISHED (EARLIER) response.

/// One QRESYNC round trip staged through `.qresync`, then three passes over
/// the log: fetch (needs the live session), vanish and the new
/// highestmodseq (only after LOGOUT), then the symlink wipe. A crash leaves
/// the log behind for the operator; a rerun after removing it converges
/// because message files are keyed by UID and created exclusively.
pub fn run<R, W>(stream: &mut imap::Stream<R, W>, store: &store::Store) -> anyhow::Result<()>
where
  R: io::Read,
  W: io::Write,
{
  anyhow::ensure!(
    !store.qresync_exists(),
    ".qresync already exists, a previous update was interrupted; remove it to start over"
  );
  let credentials = sync::Credentials::read(store)?;
  let uidvalidity = store.read_number(".uidvalidity")?;
  let highestmodseq = store.read_number(".highestmodseq")?;

  sync::greetings(stream)?;
  sync::login(stream, &credentials)?;
  sync::enable_qresync(stream)?;

  let mut qresync = store.create_qresync()?;
  let uidvalidity_ = uidvalidity.to_string();
  let highestmodseq_ = highestmodseq.to_string();
  let command: &[&[u8]] = &[
    b"select SELECT ",
    credentials.mailbox.as_bytes(),
    b" (QRESYNC (",
    uidvalidity_.as_bytes(),
    b" ",
    highestmodseq_.as_bytes(),
    b"))\r\n",
  ];
  stream.input(command, command.len())?;
  let mut same_highestmodseq = false;
  loop {
    let line = stream.read_line()?;
    match imap::parser::start(&line) {
      Ok((position, b"*")) => match imap::parser::select_data(&line[position..]) {
        Ok(imap::Select::UIDValidity(received)) => {
          // No reconciliation across a mailbox identity change: nothing
          // local can be trusted to correspond to the server's UIDs.
          anyhow::ensure!(
            received == uidvalidity,
            "UIDVALIDITY {received} does not match the stored {uidvalidity}, \
             the mailbox has been replaced"
          );
          qresync.uidvalidity(received)?;
        }
        Ok(imap::Select::HighestModSeq(received)) => {
          if received == highestmodseq {
            log::debug!("HIGHESTMODSEQ {received} is unchanged");
            same_highestmodseq = true;
          } else {
            qresync.highestmodseq(received)?;
          }
        }
        Ok(imap::Select::Fetch(uid)) => qresync.fetch(uid)?,
        Ok(imap::Select::Vanished(set)) => qresync.vanished(set)?,
        Ok(imap::Select::Exists(messages)) => log::info!("{messages} message(s) on the server"),
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
  qresync.finish()?;

  if !same_highestmodseq {
    // Fetch pass: only what's still missing, a replayed run leaves already
    // materialized messages alone.
    for record in store.qresync_records()? {
      if let store::Record::Fetch(uid) = record? {
        if store.message_exists(uid) {
          log::debug!("message {uid} already exists, skipping the fetch");
        } else {
          sync::fetch(stream, store, &uid.to_string())?;
        }
      }
    }
  }

  sync::logout(stream);

  if !same_highestmodseq {
    // Vanish pass: deletions are committed only once the session is done
    // with.
    for record in store.qresync_records()? {
      if let store::Record::Vanished(set) = record? {
        store.remove_messages_in(&set)?;
      }
    }
    // The new baseline, only after every deletion went through.
    for record in store.qresync_records()? {
      if let store::Record::HighestModSeq(received) = record? {
        store.replace_highestmodseq(received)?;
      }
    }
    // The external index is stale by now; drop it so it gets rebuilt.
    store.remove_symlinks()?;
  }

  store.remove_qresync()?;
  Ok(())
}
