use pretty_assertions::assert_eq;
use test_log::test;

mod common;

const SELECT_DIALOGUE: [&str; 9] = [
  "* OK hi",
  "login OK done",
  "qresync OK enabled",
  "* OK [UIDVALIDITY 17] UIDs valid",
  "* OK [HIGHESTMODSEQ 50] Highest",
  "* VANISHED (EARLIER) 7",
  "* 2 FETCH (UID 9 FLAGS (\\Seen))",
  "* 3 FETCH (UID 11 FLAGS (\\Seen))",
  "select OK selected",
];

fn baseline(runner: &common::Runner) -> anyhow::Result<()> {
  let store = runner.store();
  store.create(".uidvalidity", "17")?;
  store.create(".highestmodseq", "42")?;
  runner.write(".7", "hi\n")?;
  runner.write(".9", "bye\n")?;
  Ok(())
}

#[test]
fn fetch_resume_after_interruption() -> anyhow::Result<()> {
  let runner = common::Runner::new()?;
  baseline(&runner)?;

  // First run: the stream dies right after the SELECT completes, while the
  // fetch pass is asking for UID 11.
  let (result, commands) = runner.update(&common::script(&SELECT_DIALOGUE));
  assert!(result.unwrap_err().to_string().contains("end of stream"));
  assert!(commands.ends_with("fetch UID FETCH 11 RFC822\r\n"));
  // Nothing was reconciled yet and the staging log survived the crash.
  assert!(runner.exists(".qresync"));
  assert_eq!("hi\n", runner.read(".7")?);
  assert_eq!("42", runner.read(".highestmodseq")?);
  assert!(!runner.exists(".11"));

  // The operator clears the stale log and reruns; the server replays the
  // same resynchronization.
  runner.store().remove_qresync()?;
  let mut replay = SELECT_DIALOGUE.to_vec();
  replay.extend([
    "* 1 FETCH (UID 11 RFC822 {4}",
    "ok",
    ")",
    "fetch OK done",
    "logout OK bye",
  ]);
  let (result, commands) = runner.update(&common::script(&replay));
  result?;
  // .9 was already mirrored, only the missing message is fetched.
  assert!(commands.contains("fetch UID FETCH 11 RFC822\r\n"));
  assert!(!commands.contains("UID FETCH 9"));
  assert!(!runner.exists(".7"));
  assert_eq!("bye\n", runner.read(".9")?);
  assert_eq!("ok\n", runner.read(".11")?);
  assert_eq!("50", runner.read(".highestmodseq")?);
  assert!(!runner.exists(".qresync"));
  Ok(())
}

#[test]
fn interruption_inside_a_literal() -> anyhow::Result<()> {
  let runner = common::Runner::new()?;
  baseline(&runner)?;

  let mut script = common::script(&SELECT_DIALOGUE);
  script.extend_from_slice(&common::script(&["* 1 FETCH (UID 11 RFC822 {10}"]));
  script.extend_from_slice(b"par");

  let (result, _) = runner.update(&script);
  assert!(result.unwrap_err().to_string().contains("end of stream"));
  // The staging log and the partial file are left for the operator; no
  // deletion and no new baseline happened.
  assert!(runner.exists(".qresync"));
  assert!(runner.exists(".11"));
  assert_eq!("hi\n", runner.read(".7")?);
  assert_eq!("42", runner.read(".highestmodseq")?);
  Ok(())
}

#[test]
fn logout_failure_is_swallowed() -> anyhow::Result<()> {
  let runner = common::Runner::new()?;
  baseline(&runner)?;
  runner.symlink("9", ".9")?;

  let mut replay = SELECT_DIALOGUE.to_vec();
  replay.extend([
    "* 1 FETCH (UID 11 RFC822 {4}",
    "ok",
    ")",
    "fetch OK done",
    "logout BAD not today",
  ]);
  let (result, _) = runner.update(&common::script(&replay));
  // The session already yielded everything needed: the reconciliation
  // completes regardless of how the goodbye went.
  result?;
  assert!(!runner.exists(".7"));
  assert_eq!("ok\n", runner.read(".11")?);
  assert_eq!("50", runner.read(".highestmodseq")?);
  assert!(!runner.exists("9"));
  assert!(!runner.exists(".qresync"));
  Ok(())
}
