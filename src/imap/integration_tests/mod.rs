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

//! The integration tests are near "full-stack" tests which run the actual
//! client and server code, without test-specific modifications and with as
//! little "reaching under the covers" as possible.
//!
//! Each test gets its own in-memory store, populated with the users `azure`
//! and `cyan`. Each "connection" spawns a dedicated server thread. The
//! client communicates to the server over a pair of UNIX pipes (as in
//! `pipe(2)`), which presents a reasonable approximation of a real network
//! connection without the tests needing to worry about port numbers and
//! such.
//!
//! Cluster tests run two nodes in the same process over the same store; the
//! proxy on one reaches the other through a connector which spawns a server
//! thread instead of opening a socket.

mod defs;

mod basics;
mod literals;
mod mailboxes;
mod messages;
mod notifications;
mod proxy;
mod search;
