//-
// Copyright (c) 2026, Mailfront Developers
//
// This file is part of Mailfront.
//
// Mailfront is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailfront is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailfront. If not, see <http://www.gnu.org/licenses/>.

//! Command tokenizing and the response model.
//!
//! Commands arrive as a `CommandText`: the lines and literals the wire
//! decoder produced for one command. They are lexed with `nom` into a flat
//! stream of lexemes, which is then assembled into a `Token` tree. Command
//! handlers interpret the tree; there is no per-command grammar here.
//!
//! The original bytes are retained so that commands can be forwarded to
//! another node without being re-serialised.
//!
//! Responses are built as `ResponseLine` values and written with
//! `LexWriter`.

use std::borrow::Cow;
use std::io::{self, Write};
use std::str;

use chrono::prelude::*;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take, take_while1},
    character::complete::digit1,
    combinator::{map, opt},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult,
};

use super::lex::LexWriter;
use super::wire_decoder::strip_literal_marker;
use crate::account::model::*;

/// The raw text of one command: `lines.len() == literals.len() + 1`, and
/// every line but the last ends with the marker of the literal following
/// it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandText {
    pub lines: Vec<Vec<u8>>,
    pub literals: Vec<Vec<u8>>,
}

impl CommandText {
    pub fn new(first_line: Vec<u8>) -> Self {
        CommandText {
            lines: vec![first_line],
            literals: vec![],
        }
    }

    /// Parse a single-line command. Test convenience.
    #[cfg(test)]
    pub fn of(s: &str) -> Self {
        CommandText::new(s.as_bytes().to_vec())
    }

    /// Total size in bytes, counting literals.
    pub fn len(&self) -> usize {
        self.lines.iter().map(Vec::len).sum::<usize>()
            + self.literals.iter().map(Vec::len).sum::<usize>()
    }

    /// The tag, if the command got far enough to have one.
    pub fn tag(&self) -> Option<&str> {
        self.lines.first().and_then(|line| tag_of(line))
    }

    /// The command name, upper-cased.
    pub fn verb(&self) -> Option<String> {
        let line = self.lines.first()?;
        let rest = line.splitn(2, |&b| b' ' == b).nth(1)?;
        let verb = rest.split(|&b| b' ' == b).next()?;
        let verb = str::from_utf8(strip_literal_marker(verb)).ok()?;
        if verb.is_empty() {
            None
        } else {
            Some(verb.to_ascii_uppercase())
        }
    }

    /// Write the command with its tag replaced by `tag`, converting every
    /// literal to the non-synchronising form.
    pub fn write_retagged(
        &self,
        tag: &str,
        mut w: impl Write,
    ) -> io::Result<()> {
        for (ix, line) in self.lines.iter().enumerate() {
            let line = if 0 == ix {
                w.write_all(tag.as_bytes())?;
                match line.iter().position(|&b| b' ' == b) {
                    Some(space) => &line[space..],
                    None => &[][..],
                }
            } else {
                &line[..]
            };

            match self.literals.get(ix) {
                Some(literal) => {
                    w.write_all(strip_literal_marker(line))?;
                    write!(w, "{{{}+}}\r\n", literal.len())?;
                    w.write_all(literal)?;
                }
                None => {
                    w.write_all(line)?;
                    w.write_all(b"\r\n")?;
                }
            }
        }

        Ok(())
    }

    /// Tokenize the command into its tag, verb and arguments.
    pub fn parse(&self) -> Result<CommandLine, ParseError> {
        let mut lexemes = Vec::new();
        for (ix, line) in self.lines.iter().enumerate() {
            lex_line(line, self.literals.get(ix), &mut lexemes)?;
        }

        let mut lexemes = lexemes.into_iter();
        let tokens = assemble(&mut lexemes, 0)?;
        let mut tokens = tokens.into_iter();

        let tag = match tokens.next() {
            Some(Token::Atom(tag)) => tag,
            _ => return Err(ParseError("Missing tag")),
        };
        let verb = match tokens.next() {
            Some(Token::Atom(verb)) => verb.to_ascii_uppercase(),
            _ => return Err(ParseError("Missing command")),
        };

        Ok(CommandLine {
            tag,
            verb,
            args: tokens.collect(),
        })
    }
}

/// Extract the tag from the start of a command line.
pub fn tag_of(line: &[u8]) -> Option<&str> {
    let end = line.iter().position(|&b| b' ' == b).unwrap_or(line.len());
    let tag = str::from_utf8(&line[..end]).ok()?;
    if !tag.is_empty() && tag.bytes().all(is_tag_char) {
        Some(tag)
    } else {
        None
    }
}

fn is_tag_char(b: u8) -> bool {
    is_atom_char(b) && b'+' != b && b'*' != b
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseError(pub &'static str);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub tag: String,
    pub verb: String,
    pub args: Vec<Token>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Atom(String),
    /// A quoted string or a literal.
    Str(Vec<u8>),
    List(Vec<Token>),
}

impl Token {
    pub fn as_atom(&self) -> Option<&str> {
        match *self {
            Token::Atom(ref s) => Some(s),
            _ => None,
        }
    }

    /// Interpret this token as an `astring`: an atom or a string which is
    /// valid UTF-8.
    pub fn as_astring(&self) -> Option<Cow<'_, str>> {
        match *self {
            Token::Atom(ref s) => Some(Cow::Borrowed(s)),
            Token::Str(ref bytes) => {
                str::from_utf8(bytes).ok().map(Cow::Borrowed)
            }
            Token::List(_) => None,
        }
    }

    /// Interpret this token as raw bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match *self {
            Token::Atom(ref s) => Some(s.as_bytes()),
            Token::Str(ref bytes) => Some(bytes),
            Token::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Token]> {
        match *self {
            Token::List(ref items) => Some(items),
            _ => None,
        }
    }

    pub fn is_atom(&self, keyword: &str) -> bool {
        self.as_atom().map_or(false, |a| a.eq_ignore_ascii_case(keyword))
    }

    pub fn is_nil(&self) -> bool {
        self.is_atom("NIL")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Lexeme {
    Atom(Vec<u8>),
    Quoted(Vec<u8>),
    Open,
    Close,
    LiteralMarker,
}

fn is_atom_char(b: u8) -> bool {
    b > b' ' && 0x7F != b && !b"(){\"".contains(&b)
}

fn atom(i: &[u8]) -> IResult<&[u8], Lexeme> {
    map(take_while1(is_atom_char), |a: &[u8]| Lexeme::Atom(a.to_vec()))(i)
}

fn quoted(i: &[u8]) -> IResult<&[u8], Lexeme> {
    map(
        delimited(
            tag("\""),
            many0(alt((
                is_not("\\\""),
                preceded(tag("\\"), take(1usize)),
            ))),
            tag("\""),
        ),
        |parts: Vec<&[u8]>| Lexeme::Quoted(parts.concat()),
    )(i)
}

fn literal_marker(i: &[u8]) -> IResult<&[u8], Lexeme> {
    map(
        delimited(tag("{"), pair(digit1, opt(tag("+"))), tag("}")),
        |_| Lexeme::LiteralMarker,
    )(i)
}

fn lexeme(i: &[u8]) -> IResult<&[u8], Lexeme> {
    alt((
        map(tag("("), |_| Lexeme::Open),
        map(tag(")"), |_| Lexeme::Close),
        quoted,
        literal_marker,
        atom,
    ))(i)
}

/// Lex one line, substituting `literal` for its trailing marker.
fn lex_line(
    line: &[u8],
    literal: Option<&Vec<u8>>,
    dst: &mut Vec<Lexeme>,
) -> Result<(), ParseError> {
    let mut rest = line;
    loop {
        while rest.first() == Some(&b' ') {
            rest = &rest[1..];
        }

        if rest.is_empty() {
            break;
        }

        let (tail, lx) =
            lexeme(rest).map_err(|_| ParseError("Unrecognised syntax"))?;
        rest = tail;

        if Lexeme::LiteralMarker == lx {
            if !rest.is_empty() {
                return Err(ParseError("Unexpected literal marker"));
            }

            match literal {
                Some(data) => dst.push(Lexeme::Quoted(data.clone())),
                None => return Err(ParseError("Literal without content")),
            }
        } else {
            dst.push(lx);
        }
    }

    Ok(())
}

/// How deeply parenthesised lists may nest within one command.
pub const MAX_LIST_DEPTH: usize = 64;

/// Build the tokens of one list, `depth` levels into the command.
fn assemble(
    lexemes: &mut impl Iterator<Item = Lexeme>,
    depth: usize,
) -> Result<Vec<Token>, ParseError> {
    let nested = depth > 0;
    let mut ret = Vec::new();
    while let Some(lexeme) = lexemes.next() {
        ret.push(match lexeme {
            Lexeme::Atom(bytes) => Token::Atom(
                String::from_utf8(bytes)
                    .map_err(|_| ParseError("Non-UTF-8 atom"))?,
            ),
            Lexeme::Quoted(bytes) => Token::Str(bytes),
            Lexeme::Open if depth >= MAX_LIST_DEPTH => {
                return Err(ParseError("Lists nested too deeply"))
            }
            Lexeme::Open => Token::List(assemble(lexemes, depth + 1)?),
            Lexeme::Close if nested => return Ok(ret),
            Lexeme::Close => return Err(ParseError("Unbalanced ')'")),
            Lexeme::LiteralMarker => {
                return Err(ParseError("Unexpected literal marker"))
            }
        });
    }

    if nested {
        Err(ParseError("Unbalanced '('"))
    } else {
        Ok(ret)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RespCondType {
    Ok,
    No,
    Bad,
    Bye,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RespTextCode {
    Alert,
    AlreadyExists,
    AuthenticationFailed,
    Cannot,
    Capability(&'static [&'static str]),
    ClientBug,
    InUse,
    Limit,
    Nonexistent,
    NoPerm,
    Parse,
    /// The flags, and whether new keywords may be created.
    PermanentFlags(Vec<Flag>, bool),
    ReadOnly,
    ReadWrite,
    ServerBug,
    TooBig,
    TryCreate,
    Unavailable,
    UidNext(u32),
    UidValidity(u32),
    Unseen(u32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CondResponse {
    pub cond: RespCondType,
    pub code: Option<RespTextCode>,
    pub quip: Option<Cow<'static, str>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MailboxList {
    pub flags: Vec<&'static str>,
    /// The UTF-8 name; encoded on output.
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchAtt {
    Uid(Uid),
    Flags { flags: Vec<Flag>, recent: bool },
    Rfc822Size(u32),
    InternalDate(DateTime<FixedOffset>),
    /// `BODY[]` or `RFC822`, per `name`.
    Body { name: &'static str, data: Vec<u8> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Cond(CondResponse),
    Capability(&'static [&'static str]),
    Flags(Vec<Flag>),
    Exists(u32),
    Recent(u32),
    Expunge(Seqnum),
    List(MailboxList),
    Lsub(MailboxList),
    Status {
        name: String,
        items: Vec<(&'static str, u64)>,
    },
    Search(Vec<u32>),
    Fetch {
        seqnum: Seqnum,
        atts: Vec<FetchAtt>,
    },
    Id(Vec<(String, String)>),
    Namespace,
    /// A response line from another node, passed through as-is. Does not
    /// include the final CRLF.
    Raw(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseLine {
    pub tag: Option<String>,
    pub response: Response,
}

impl ResponseLine {
    /// Write this response, not including the line ending.
    pub fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        if let Response::Raw(ref raw) = self.response {
            return w.raw(raw);
        }

        match self.tag {
            Some(ref tag) => w.verbatim(tag)?,
            None => w.verbatim("*")?,
        }
        w.verbatim(" ")?;
        self.response.write_to(w)
    }
}

impl Response {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        match *self {
            Response::Cond(ref cr) => cr.write_to(w),
            Response::Capability(caps) => {
                w.verbatim("CAPABILITY")?;
                for cap in caps {
                    w.verbatim(" ")?;
                    w.verbatim(cap)?;
                }
                Ok(())
            }
            Response::Flags(ref flags) => {
                w.verbatim("FLAGS ")?;
                w.flag_list(flags, false)
            }
            Response::Exists(n) => w.verbatim(&format!("{} EXISTS", n)),
            Response::Recent(n) => w.verbatim(&format!("{} RECENT", n)),
            Response::Expunge(seqnum) => {
                w.verbatim(&format!("{} EXPUNGE", seqnum))
            }
            Response::List(ref ml) => {
                w.verbatim("LIST ")?;
                ml.write_to(w)
            }
            Response::Lsub(ref ml) => {
                w.verbatim("LSUB ")?;
                ml.write_to(w)
            }
            Response::Status { ref name, ref items } => {
                w.verbatim("STATUS ")?;
                w.mailbox(name)?;
                w.verbatim(" (")?;
                for (ix, &(item, value)) in items.iter().enumerate() {
                    if ix > 0 {
                        w.verbatim(" ")?;
                    }
                    w.verbatim(&format!("{} {}", item, value))?;
                }
                w.verbatim(")")
            }
            Response::Search(ref hits) => {
                w.verbatim("SEARCH")?;
                for hit in hits {
                    w.verbatim(&format!(" {}", hit))?;
                }
                Ok(())
            }
            Response::Fetch { seqnum, ref atts } => {
                w.verbatim(&format!("{} FETCH (", seqnum))?;
                for (ix, att) in atts.iter().enumerate() {
                    if ix > 0 {
                        w.verbatim(" ")?;
                    }
                    att.write_to(w)?;
                }
                w.verbatim(")")
            }
            Response::Id(ref pairs) => {
                w.verbatim("ID (")?;
                for (ix, &(ref k, ref v)) in pairs.iter().enumerate() {
                    if ix > 0 {
                        w.verbatim(" ")?;
                    }
                    w.string(k)?;
                    w.verbatim(" ")?;
                    w.string(v)?;
                }
                w.verbatim(")")
            }
            Response::Namespace => w.verbatim(
                "NAMESPACE ((\"\" \"/\")) ((\"/home/\" \"/\")) NIL",
            ),
            Response::Raw(ref raw) => w.raw(raw),
        }
    }
}

impl CondResponse {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        w.verbatim(match self.cond {
            RespCondType::Ok => "OK",
            RespCondType::No => "NO",
            RespCondType::Bad => "BAD",
            RespCondType::Bye => "BYE",
        })?;

        if let Some(ref code) = self.code {
            w.verbatim(" [")?;
            code.write_to(w)?;
            w.verbatim("]")?;
        }

        match self.quip {
            // Response text is free-form but must stay on one line
            Some(ref quip) => {
                w.verbatim(" ")?;
                w.verbatim(
                    &quip.replace(|c: char| '\r' == c || '\n' == c, " "),
                )
            }
            None => Ok(()),
        }
    }
}

impl RespTextCode {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        match *self {
            RespTextCode::Alert => w.verbatim("ALERT"),
            RespTextCode::AlreadyExists => w.verbatim("ALREADYEXISTS"),
            RespTextCode::AuthenticationFailed => {
                w.verbatim("AUTHENTICATIONFAILED")
            }
            RespTextCode::Cannot => w.verbatim("CANNOT"),
            RespTextCode::Capability(caps) => {
                w.verbatim("CAPABILITY")?;
                for cap in caps {
                    w.verbatim(" ")?;
                    w.verbatim(cap)?;
                }
                Ok(())
            }
            RespTextCode::ClientBug => w.verbatim("CLIENTBUG"),
            RespTextCode::InUse => w.verbatim("INUSE"),
            RespTextCode::Limit => w.verbatim("LIMIT"),
            RespTextCode::Nonexistent => w.verbatim("NONEXISTENT"),
            RespTextCode::NoPerm => w.verbatim("NOPERM"),
            RespTextCode::Parse => w.verbatim("PARSE"),
            RespTextCode::PermanentFlags(ref flags, keywords) => {
                w.verbatim("PERMANENTFLAGS ")?;
                w.flag_list(flags, keywords)
            }
            RespTextCode::ReadOnly => w.verbatim("READ-ONLY"),
            RespTextCode::ReadWrite => w.verbatim("READ-WRITE"),
            RespTextCode::ServerBug => w.verbatim("SERVERBUG"),
            RespTextCode::TooBig => w.verbatim("TOOBIG"),
            RespTextCode::TryCreate => w.verbatim("TRYCREATE"),
            RespTextCode::Unavailable => w.verbatim("UNAVAILABLE"),
            RespTextCode::UidNext(n) => w.verbatim(&format!("UIDNEXT {}", n)),
            RespTextCode::UidValidity(n) => {
                w.verbatim(&format!("UIDVALIDITY {}", n))
            }
            RespTextCode::Unseen(n) => w.verbatim(&format!("UNSEEN {}", n)),
        }
    }
}

impl MailboxList {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        w.verbatim("(")?;
        for (ix, flag) in self.flags.iter().enumerate() {
            if ix > 0 {
                w.verbatim(" ")?;
            }
            w.verbatim(flag)?;
        }
        w.verbatim(") \"/\" ")?;
        w.mailbox(&self.name)
    }
}

impl FetchAtt {
    fn write_to<W: Write>(&self, w: &mut LexWriter<W>) -> io::Result<()> {
        match *self {
            FetchAtt::Uid(uid) => w.verbatim(&format!("UID {}", uid)),
            FetchAtt::Flags { ref flags, recent } => {
                w.verbatim("FLAGS ")?;
                w.flags_with_recent(flags, recent)
            }
            FetchAtt::Rfc822Size(size) => {
                w.verbatim(&format!("RFC822.SIZE {}", size))
            }
            FetchAtt::InternalDate(date) => {
                w.verbatim("INTERNALDATE ")?;
                w.datetime(date)
            }
            FetchAtt::Body { name, ref data } => {
                w.verbatim(name)?;
                w.verbatim(" ")?;
                w.literal(data)
            }
        }
    }
}
