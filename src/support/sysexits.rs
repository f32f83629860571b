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

//! The subset of `sysexits.h` the CLI exits with.

use std::io;

use crate::support::error::Error;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Sysexit(pub i32);

pub const EX_USAGE: Sysexit = Sysexit(64);
pub const EX_NOUSER: Sysexit = Sysexit(67);
pub const EX_UNAVAILABLE: Sysexit = Sysexit(69);
pub const EX_SOFTWARE: Sysexit = Sysexit(70);
pub const EX_OSERR: Sysexit = Sysexit(71);
pub const EX_CANTCREAT: Sysexit = Sysexit(73);
pub const EX_IOERR: Sysexit = Sysexit(74);
pub const EX_NOPERM: Sysexit = Sysexit(77);
pub const EX_CONFIG: Sysexit = Sysexit(78);

impl Sysexit {
    pub fn exit(self) -> ! {
        std::process::exit(self.0)
    }

    /// Choose the exit code for a fatal error.
    pub fn for_error(e: &Error) -> Self {
        match *e {
            Error::Io(ref e) if io::ErrorKind::PermissionDenied == e.kind() => {
                EX_NOPERM
            }
            Error::Io(ref e) if io::ErrorKind::AddrInUse == e.kind() => {
                EX_UNAVAILABLE
            }
            Error::Io(_) => EX_IOERR,
            Error::Toml(_) => EX_CONFIG,
            Error::NxAccount => EX_NOUSER,
            Error::NoNodesAvailable => EX_CONFIG,
            _ => EX_SOFTWARE,
        }
    }
}
