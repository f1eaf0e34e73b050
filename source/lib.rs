// https://www.rfc-editor.org/rfc/rfc3501 - IMAP4rev1
// https://www.rfc-editor.org/rfc/rfc2177 - IMAP4 IDLE command
// https://www.rfc-editor.org/rfc/rfc7162 - [...] Quick Mailbox Resynchronization (QRESYNC)
//
// The session is pre-established: a TLS tunnel (socat, typically) maps the
// server socket onto this process's stdin/stdout. Commands go to stdout,
// responses come from stdin, diagnostics stay on stderr.

#![allow(clippy::upper_case_acronyms)]

use anyhow::Context as _;
use std::{
  io::{self, Write as _},
  path,
};
use zeroize::Zeroize as _;

pub mod imap;
pub mod store;
pub mod sync;

#[derive(Clone, Copy, Debug, PartialEq, clap::Subcommand)]
pub enum Command {
  #[command(about = "Prompt for the credentials and mailbox, write the state files")]
  Init,
  #[command(about = "Mirror the mailbox into the working directory")]
  Download,
  #[command(about = "Reconcile the working directory with the mailbox via QRESYNC")]
  Update,
  #[command(about = "Wait for a change notification, then exit")]
  Idle,
}

#[derive(clap::Args)]
#[group(skip)]
pub struct Arguments {
  #[command(subcommand)]
  pub command: Command,

  #[arg(
    long = "directory",
    help = "Working directory",
    default_value_t = String::from(".")
  )]
  pub directory: String,
}

pub fn run(arguments: &Arguments) -> anyhow::Result<()> {
  let store = store::Store::new(path::Path::new(&arguments.directory));
  match arguments.command {
    Command::Init => init(&store),
    Command::Download => sync::download::run(&mut session(), &store),
    Command::Update => sync::update::run(&mut session(), &store),
    Command::Idle => sync::idle::run(&mut session(), &store),
  }
}

fn session() -> imap::Stream<io::Stdin, io::Stdout> {
  imap::Stream::new(io::stdin(), io::stdout())
}

fn prompt(message: &str) -> anyhow::Result<String> {
  let mut stdout = io::stdout();
  stdout.write_all(message.as_bytes())?;
  stdout.flush()?;
  let mut line = String::new();
  let read = io::stdin().read_line(&mut line)?;
  anyhow::ensure!(read > 0, "end of input");
  while line.ends_with('\n') || line.ends_with('\r') {
    line.pop();
  }
  Ok(line)
}

fn init(store: &store::Store) -> anyhow::Result<()> {
  anyhow::ensure!(store.is_empty()?, "{:?} is not empty", store.path());
  let username = prompt("Enter IMAP username: ")?;
  // Unlike the other two prompts this one suppresses the terminal echo.
  let mut password =
    rpassword::prompt_password("Enter IMAP password: ").context("couldn't read the password")?;
  let mailbox = prompt("Enter IMAP mailbox: ")?;
  store.create(".username", &username)?;
  let result = store.create(".password", &password);
  password.zeroize();
  result?;
  store.create(".mailbox", &mailbox)?;
  Ok(())
}
