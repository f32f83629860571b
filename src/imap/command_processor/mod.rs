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

//! The session engine: per-connection protocol state and the command
//! handlers.
//!
//! This module is split into several submodules for manageability, but is
//! best thought of as one single module.

macro_rules! map_error {
    ($this:expr) => {{
        let log_prefix = &$this.log_prefix;
        move |e| catch_all_error_handling(log_prefix, e)
    }};

    ($this:expr, $($($kind:ident)|+ => ($cond:ident, $code:expr),)+) => {{
        let log_prefix = &$this.log_prefix;
        move |e| match e {
            $($(Error::$kind { .. })|* => s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::$cond,
                code: $code,
                quip: Some(Cow::Owned(e.to_string())),
            }),)*
            e => catch_all_error_handling(log_prefix, e),
        }
    }};
}

// account! and selected! are macros instead of methods on CommandProcessor
// since there is no way to express that they borrow only one field --- as a
// method, the returned value is considered to borrow the whole
// `CommandProcessor`.
macro_rules! account {
    ($this:expr) => {
        match $this.state {
            SessionState::Authenticated(ref creds)
            | SessionState::Selected(ref creds, _) => Ok(creds),
            _ => Err(s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Bad,
                code: None,
                quip: Some(Cow::Borrowed("Not logged in")),
            })),
        }
    };
}

macro_rules! selected {
    ($this:expr) => {
        match $this.state {
            SessionState::Selected(ref creds, Selected::Local(ref mut sel)) => {
                Ok((&*creds, sel))
            }
            _ => Err(s::Response::Cond(s::CondResponse {
                cond: s::RespCondType::Bad,
                code: None,
                quip: Some(Cow::Borrowed("No mailbox selected")),
            })),
        }
    };
}

mod auth;
mod defs;
mod mailboxes;
mod messages;
mod search;
mod select;

pub use self::defs::{CommandProcessor, Services};
