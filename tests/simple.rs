use pretty_assertions::assert_eq;
use test_log::test;

mod common;

#[test]
fn download_two_messages() -> anyhow::Result<()> {
  let runner = common::Runner::new()?;
  let (result, commands) = runner.download(&common::script(&[
    "* OK hi",
    "login OK done",
    "qresync OK enabled",
    "* 2 EXISTS",
    "* OK [UIDVALIDITY 17] UIDs valid",
    "* OK [HIGHESTMODSEQ 42] Highest",
    "select OK selected",
    "* 1 FETCH (UID 7 RFC822 {4}",
    "hi",
    ")",
    "* 2 FETCH (UID 9 RFC822 {5}",
    "bye",
    ")",
    "fetch OK done",
    "logout OK bye",
  ]));
  result?;
  assert_eq!(
    "login LOGIN user password\r\n\
     qresync ENABLE QRESYNC\r\n\
     select SELECT INBOX\r\n\
     fetch UID FETCH 1:* RFC822\r\n\
     logout LOGOUT\r\n",
    commands
  );
  assert_eq!("17", runner.read(".uidvalidity")?);
  assert_eq!("42", runner.read(".highestmodseq")?);
  assert_eq!("hi\n", runner.read(".7")?);
  assert_eq!("bye\n", runner.read(".9")?);
  assert_eq!(
    vec![
      ".7",
      ".9",
      ".highestmodseq",
      ".mailbox",
      ".password",
      ".uidvalidity",
      ".username",
    ],
    runner.entries()?
  );
  Ok(())
}

#[test]
fn download_requires_an_empty_directory() -> anyhow::Result<()> {
  let runner = common::Runner::new()?;
  runner.write("stray", "x")?;
  let (result, commands) = runner.download(&common::script(&["* OK hi"]));
  assert!(result.unwrap_err().to_string().contains("is not empty"));
  // Refused before any network traffic.
  assert_eq!("", commands);
  Ok(())
}

#[test]
fn update_without_changes() -> anyhow::Result<()> {
  let runner = common::Runner::new()?;
  let store = runner.store();
  store.create(".uidvalidity", "17")?;
  store.create(".highestmodseq", "42")?;
  runner.write(".7", "hi\n")?;
  runner.write(".9", "bye\n")?;
  runner.symlink("9", ".9")?;
  let before = runner.entries()?;

  let (result, commands) = runner.update(&common::script(&[
    "* OK hi",
    "login OK done",
    "qresync OK enabled",
    "* OK [UIDVALIDITY 17] UIDs valid",
    "* OK [HIGHESTMODSEQ 42] Highest",
    "select OK selected",
    "logout OK bye",
  ]));
  result?;
  assert_eq!(
    "login LOGIN user password\r\n\
     qresync ENABLE QRESYNC\r\n\
     select SELECT INBOX (QRESYNC (17 42))\r\n\
     logout LOGOUT\r\n",
    commands
  );
  // Nothing moved: no fetch pass, no vanish pass, the symlink survived and
  // the baseline is untouched.
  assert_eq!(before, runner.entries()?);
  assert_eq!("42", runner.read(".highestmodseq")?);
  assert_eq!("hi\n", runner.read(".7")?);
  assert!(runner.exists("9"));
  assert!(!runner.exists(".qresync"));
  Ok(())
}

#[test]
fn idle_until_new_mail() -> anyhow::Result<()> {
  let runner = common::Runner::new()?;
  let (result, commands) = runner.idle(&common::script(&[
    "* OK hi",
    "login OK done",
    "* 2 EXISTS",
    "* OK [UIDVALIDITY 17] UIDs valid",
    "select OK selected",
    "+ idling",
    "* OK Still here",
    "* 3 EXISTS",
    "idle OK done",
    "logout OK bye",
  ]));
  result?;
  assert_eq!(
    "login LOGIN user password\r\n\
     select SELECT INBOX\r\n\
     idle IDLE\r\n\
     DONE\r\n\
     logout LOGOUT\r\n",
    commands
  );
  Ok(())
}

#[test]
fn idle_rejection_is_fatal() -> anyhow::Result<()> {
  let runner = common::Runner::new()?;
  let (result, _) = runner.idle(&common::script(&[
    "* OK hi",
    "login OK done",
    "select OK selected",
    "idle BAD IDLE not supported",
  ]));
  assert!(result
    .unwrap_err()
    .to_string()
    .contains("couldn't idle"));
  Ok(())
}
