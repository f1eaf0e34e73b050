// The responses this client consumes are line-shaped: even message literals
// are framed so that the lengths of the received lines sum to the announced
// size. A PEG over each complete line is enough; no incremental parsing.

use std::{
  cmp, fmt,
  io::{self, BufRead as _, Read as _},
  str,
};

// Inclusive.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range(pub u64, pub u64);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Status {
  Ok,
  No,
  Bad,
}

impl fmt::Display for Status {
  fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    formatter.write_str(match self {
      Status::Ok => "OK",
      Status::No => "NO",
      Status::Bad => "BAD",
    })
  }
}

/// Untagged data the engine cares about between a SELECT (or IDLE) and its
/// completion. Everything else is skipped by the caller.
#[derive(Debug, PartialEq)]
pub enum Select<'input> {
  Exists(u64),
  UIDValidity(u64),
  HighestModSeq(u64),
  /// The uid-set is kept verbatim: it goes to the staging log as received.
  Vanished(&'input [u8]),
  /// A flag-change FETCH carrying a UID, as mandated by QRESYNC.
  Fetch(u64),
}

fn parse_number(n: &[u8]) -> u64 {
  // UTF-8 is guaranteed by the BNF; the value fitting u64 is not, but a
  // server producing 20-digit UIDs has bigger problems.
  str::from_utf8(n).unwrap().parse().unwrap()
}

peg::parser! {
  // https://www.rfc-editor.org/rfc/rfc2234#section-2.3
  // https://www.rfc-editor.org/rfc/rfc3501#section-9
  pub grammar parser() for [u8] {
    // CR = %x0D
    rule CR() = "\r"
    // LF = %x0A
    rule LF() = "\n"
    // CRLF = CR LF
    rule CRLF() = CR() LF()
    // CHAR = %x01-7F
    rule CHAR() -> u8
      = [b'\x01'..=b'\x7f']
    // CTL = %x00-1F / %x7F
    rule CTL() = [b'\x00'..=b'\x1f'] / "\x7f"
    // DQUOTE = %x22
    rule DQUOTE() = "\""
    // In all cases, SP refers to exactly one space.
    rule SP() = " "
    // TEXT-CHAR = <any CHAR except CR and LF>
    rule TEXT_CHAR() -> u8
      = !(CR() / LF()) c:CHAR()
      { c }
    // DIGIT = %x30-39
    rule DIGIT() = [b'\x30'..=b'\x39']
    // digit-nz = %x31-39
    rule digit_nz() = [b'\x31'..=b'\x39']

    // number = 1*DIGIT
    rule number() -> u64
      = n:$(DIGIT()+)
      { parse_number(n) }
    // nz-number = digit-nz *DIGIT
    rule nz_number() -> u64
      = n:$(digit_nz() DIGIT()*)
      { parse_number(n) }
    // uniqueid = nz-number
    rule uniqueid() -> u64 = nz_number()
    // text = 1*TEXT-CHAR
    rule text() = TEXT_CHAR()+

    // list-wildcards = "%" / "*"
    rule list_wildcards() = "%" / "*"
    // quoted-specials = DQUOTE / "\"
    rule quoted_specials() = DQUOTE() / "\\"
    // resp-specials = "]"
    rule resp_specials() = "]"
    // atom-specials = "(" / ")" / "{" / SP / CTL / list-wildcards / quoted-specials / resp-specials
    rule atom_specials() = "(" / ")" / "{" / SP() / CTL() / list_wildcards() / quoted_specials() / resp_specials()
    // ATOM-CHAR = <any CHAR except atom-specials>
    rule ATOM_CHAR() = !atom_specials() CHAR()
    // ASTRING-CHAR = ATOM-CHAR / resp-specials
    rule ASTRING_CHAR() = ATOM_CHAR() / resp_specials()
    // tag = 1*<any ASTRING-CHAR except "+">
    rule tag() -> &'input [u8] = $((!"+" ASTRING_CHAR())+)

    // https://www.rfc-editor.org/rfc/rfc7162#section-7
    // mod-sequence-value = 1*DIGIT
    rule mod_sequence_value() -> u64
      = n:$(DIGIT()+)
      { parse_number(n) }

    // https://www.rfc-editor.org/rfc/rfc4315#section-4
    // uid-range = (uniqueid ":" uniqueid)
    // Example: 2:4 and 4:2 are equivalent.
    rule uid_range() -> Range
      = u1:uniqueid() ":" u2:uniqueid()
      {
        if u1 <= u2 {
          Range(u1, u2)
        } else {
          Range(u2, u1)
        }
      }
    // https://www.rfc-editor.org/rfc/rfc4315#section-4
    // uid-set = (uniqueid / uid-range) *("," uid-set)
    // uid-range goes first: a bare uniqueid would otherwise commit on the
    // first half of "2:4" and the set would fail to parse.
    pub rule uid_set() -> Vec<Range>
      = (uid_range() / (u:uniqueid() { Range(u, u) })) ** ","

    // msg-att-static = ... / "UID" SP uniqueid / ...
    rule msg_att_static_uid() -> u64
      = "UID" SP() u:uniqueid()
      { u }

    // https://www.rfc-editor.org/rfc/rfc3501#section-2.2.2
    // Data transmitted by the server to the client and status responses that do not indicate
    // command completion are prefixed with the token "*", and are called untagged responses.
    // [...]
    // The server completion result response [...] is tagged with the same tag as the client
    // command which began the operation.
    #[no_eof]
    pub rule start() -> (usize, &'input [u8])
      = s:($("*") / tag()) SP() p:position!()
      { (p, s) }

    // resp-text = ["[" resp-text-code "]" SP] text
    // resp-cond-state = ("OK" / "NO" / "BAD") SP resp-text
    // The text is returned untouched so failures can quote the server.
    pub rule condition() -> (Status, &'input [u8])
      = s:("OK" { Status::Ok } / "NO" { Status::No } / "BAD" { Status::Bad })
        t:$((SP() text())?) CRLF()
      { (s, t) }

    // continuation-req = "+" SP (resp-text / base64) CRLF
    // Some servers send a bare "+" so everything past it is optional.
    pub rule continuation() = "+" (SP() text()?)? CRLF()

    // https://www.rfc-editor.org/rfc/rfc3501#section-7.1
    // resp-text-code = ... / "UIDVALIDITY" SP nz-number / ...
    // https://www.rfc-editor.org/rfc/rfc7162#section-7
    // resp-text-code =/ "HIGHESTMODSEQ" SP mod-sequence-value
    //
    // https://www.rfc-editor.org/rfc/rfc7162#section-3.2.10
    // The VANISHED response [first form] contains the EARLIER tag, which signifies that the
    // response was caused by a UID FETCH (VANISHED) or a SELECT/EXAMINE (QRESYNC) command.
    // expunged-resp = "VANISHED" [SP "(EARLIER)"] SP known-uids
    //
    // https://www.rfc-editor.org/rfc/rfc7162#section-3.2.5.1
    // The server sends the client any pending flag changes (using FETCH responses that MUST
    // contain UIDs) [...] that have occurred in this mailbox since the provided modification
    // sequence.
    //
    // Only the UID is extracted from those FETCH responses; the attribute order varies per
    // server so the attribute list is scanned rather than enumerated.
    pub rule select_data() -> Select<'input>
      = "OK" SP() "[" s:(
            ("UIDVALIDITY" SP() n:nz_number() { Select::UIDValidity(n) })
          / ("HIGHESTMODSEQ" SP() n:mod_sequence_value() { Select::HighestModSeq(n) })
        ) "]" (SP() text())? CRLF()
        { s }
      / "VANISHED" SP() "(EARLIER)" SP() s:$(uid_set()) CRLF()
        { Select::Vanished(s) }
      / n:nz_number() SP() "EXISTS" CRLF()
        { Select::Exists(n) }
      / nz_number() SP() "FETCH" SP() "("
          (!msg_att_static_uid() TEXT_CHAR())* u:msg_att_static_uid()
          (!(")" CRLF()) TEXT_CHAR())* ")" CRLF()
        { Select::Fetch(u) }

    // msg-att-static = ... / "RFC822" SP nstring / "UID" SP uniqueid / ...
    // message-data = nz-number SP ("EXPUNGE" / ("FETCH" SP msg-att))
    //
    // The header line of a full message FETCH: the literal body follows on the wire and is
    // streamed by the caller, so this rule ends at the "{<size>}" CRLF.
    pub rule fetch_message() -> (u64, u64)
      = nz_number() SP() "FETCH" SP() "("
        (!msg_att_static_uid() TEXT_CHAR())* u:msg_att_static_uid()
        (!("RFC822" SP() "{") TEXT_CHAR())* "RFC822" SP() "{" n:number() "}" CRLF()
      { (u, n) }
  }
}

/// Membership in the uid-set grammar. Malformed sets match nothing.
pub fn contains(set: &[u8], uid: u64) -> bool {
  match parser::uid_set(set) {
    Ok(ranges) => ranges
      .iter()
      .any(|&Range(start, end)| start <= uid && uid <= end),
    Err(_) => false,
  }
}

pub(crate) fn escape(bytes: &[u8]) -> String {
  let mut string = String::new();
  for byte in bytes {
    string += &std::ascii::escape_default(*byte).to_string();
  }
  string
}

fn summarize(bytes: &[u8]) -> String {
  let stop = bytes
    .windows(2)
    .position(|window| window == b"\r\n")
    .unwrap_or(bytes.len());
  let stop = cmp::min(stop + 2 /* \r\n */, bytes.len());
  let mut string = escape(&bytes[..stop]);
  if stop < bytes.len() {
    string += "...omitted...";
  }
  string
}

// https://www.rfc-editor.org/rfc/rfc7162#section-4
// [...] a client should limit the length of the command lines it generates to approximately
// 8192 octets (including all quoted strings but not including literals).
// Response lines get the same allowance; literal bodies are unbounded.
const MAX_LINE: u64 = 8 * 1024;

/// One side of the pre-established session: responses come in on `R`,
/// commands go out on `W` (stdin/stdout under the TLS tunnel, scripted
/// buffers in the tests).
#[derive(Debug)]
pub struct Stream<R, W> {
  reader: io::BufReader<R>,
  writer: W,
}

impl<R, W> Stream<R, W>
where
  R: io::Read,
  W: io::Write,
{
  pub fn new(reader: R, writer: W) -> Self {
    Self {
      reader: io::BufReader::new(reader),
      writer,
    }
  }

  /// The next response line, CR-LF included. EOF is fatal: the server is
  /// expected to complete every dialogue before the stream closes.
  pub fn read_line(&mut self) -> anyhow::Result<Vec<u8>> {
    let mut line = Vec::new();
    let read = (&mut self.reader)
      .take(MAX_LINE)
      .read_until(b'\n', &mut line)?;
    anyhow::ensure!(read > 0, "end of stream");
    if !line.ends_with(b"\n") {
      anyhow::ensure!(
        (read as u64) < MAX_LINE,
        "response line exceeds {MAX_LINE} bytes"
      );
      anyhow::bail!("end of stream");
    }
    log::debug!("< {}", summarize(&line));
    Ok(line)
  }

  /// One line of a literal body, never consuming more than `remaining`
  /// bytes. The last line of a message may legitimately end at the literal
  /// boundary without a terminator.
  pub fn read_literal_line(&mut self, remaining: u64) -> anyhow::Result<Vec<u8>> {
    let mut line = Vec::new();
    let read = (&mut self.reader)
      .take(remaining)
      .read_until(b'\n', &mut line)?;
    anyhow::ensure!(read > 0, "end of stream");
    log::trace!("< {}", summarize(&line));
    Ok(line)
  }

  /// Sends a command. Only the first `log` buffers are mirrored to the log
  /// so credentials stay out of it.
  pub fn input(&mut self, buffers: &[&[u8]], log: usize) -> anyhow::Result<()> {
    if log::log_enabled!(log::Level::Debug) && log > 0 {
      log::debug!(
        "> {}{}",
        escape(&buffers[..log].concat()),
        if log < buffers.len() {
          "...omitted..."
        } else {
          ""
        }
      );
    } else {
      log::debug!("> ...omitted...");
    }
    for buffer in buffers.iter() {
      self.writer.write_all(buffer)?;
    }
    self.writer.flush()?;
    Ok(())
  }
}
