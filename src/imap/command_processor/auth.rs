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

use std::borrow::Cow;

use log::{info, warn};
use secstr::SecStr;

use super::defs::*;
use crate::imap::proxy::{PROXY_ID_KEY, PROXY_SECRET_ID_KEY};
use crate::support::error::Error;

impl CommandProcessor {
    pub(super) fn cmd_capability(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
    ) -> CmdResult {
        arity(args, 0)?;
        sender(s::Response::Capability(CAPABILITIES));
        success()
    }

    pub(super) fn cmd_noop(&mut self, args: &[s::Token]) -> CmdResult {
        arity(args, 0)?;
        success()
    }

    pub(super) fn cmd_logout(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
    ) -> CmdResult {
        arity(args, 0)?;

        self.deselect();
        self.proxy = None;
        self.state = SessionState::Closed;

        sender(s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::Bye,
            code: None,
            quip: Some(Cow::Borrowed("Bye")),
        }));
        success()
    }

    pub(super) fn cmd_id(
        &mut self,
        args: &[s::Token],
        sender: SendResponse<'_>,
    ) -> CmdResult {
        arity(args, 1)?;

        let mut name = None;
        let mut version = None;
        let mut proxy_node = None;
        let mut proxy_secret = None;
        if !args[0].is_nil() {
            let items = args[0]
                .as_list()
                .ok_or_else(|| parse_error("ID expects NIL or a list"))?;
            if 0 != items.len() % 2 {
                return Err(parse_error("Unpaired ID field"));
            }

            for pair in items.chunks(2) {
                let key = pair[0]
                    .as_astring()
                    .ok_or_else(|| parse_error("Bad ID field name"))?;
                let value = if pair[1].is_nil() {
                    None
                } else {
                    Some(
                        pair[1]
                            .as_astring()
                            .ok_or_else(|| parse_error("Bad ID field value"))?
                            .into_owned(),
                    )
                };

                if key.eq_ignore_ascii_case("name") {
                    name = value;
                } else if key.eq_ignore_ascii_case("version") {
                    version = value;
                } else if key.eq_ignore_ascii_case(PROXY_ID_KEY) {
                    proxy_node = value;
                } else if key.eq_ignore_ascii_case(PROXY_SECRET_ID_KEY) {
                    proxy_secret = value;
                }
            }
        }

        if let Some(node) = proxy_node {
            self.accept_proxy(node, proxy_secret.as_deref());
        }

        self.log_prefix.set_user_agent(name, version);

        let mut reply = vec![
            ("name".to_owned(), env!("CARGO_PKG_NAME").to_owned()),
            ("version".to_owned(), env!("CARGO_PKG_VERSION").to_owned()),
        ];
        reply.extend(
            self.services
                .config
                .identification
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        sender(s::Response::Id(reply));
        success()
    }

    /// Handle another node announcing that it is proxying this session.
    ///
    /// The announcement is only believed before login, and only with the
    /// cluster's shared secret. A believed proxy has already routed the
    /// session, so every folder is then served here.
    fn accept_proxy(&mut self, node: String, secret: Option<&str>) {
        if !matches!(self.state, SessionState::NotAuthenticated) {
            return;
        }

        let expected = self.services.config.cluster.proxy_secret.as_deref();
        let trusted = match (expected, secret) {
            (Some(expected), Some(secret)) => {
                SecStr::new(expected.as_bytes().to_vec())
                    == SecStr::new(secret.as_bytes().to_vec())
            }
            _ => false,
        };

        if trusted {
            info!("{} Session proxied from node {}", self.log_prefix, node);
            self.log_prefix.set_via(Some(node.clone()));
            self.proxied_from = Some(node);
        } else {
            warn!(
                "{} Ignoring unauthenticated proxy announcement from {:?}",
                self.log_prefix, node
            );
        }
    }

    pub(super) fn cmd_login(&mut self, args: &[s::Token]) -> CmdResult {
        match self.state {
            SessionState::NotAuthenticated => (),
            _ => {
                return Err(s::Response::Cond(s::CondResponse {
                    cond: s::RespCondType::Bad,
                    code: Some(s::RespTextCode::ClientBug),
                    quip: Some(Cow::Borrowed("Already logged in")),
                }))
            }
        }

        arity(args, 2)?;
        let user = astring_arg(args, 0)?;
        let password = args[1]
            .as_bytes()
            .ok_or_else(|| parse_error("Expected a password"))?;

        let creds = self
            .services
            .auth
            .authenticate(&user, password)
            .map_err(|e| match e {
                Error::AuthenticationFailed => {
                    // Only log a warning if a password was actually
                    // provided; an empty one is usually a client probing.
                    if !password.is_empty() && password != user.as_bytes() {
                        warn!(
                            "{} Rejected login for user '{}'",
                            self.log_prefix, user
                        );
                    }

                    s::Response::Cond(s::CondResponse {
                        cond: s::RespCondType::No,
                        code: Some(s::RespTextCode::AuthenticationFailed),
                        quip: Some(Cow::Borrowed("Bad user id or password")),
                    })
                }
                e => catch_all_error_handling(&self.log_prefix, e),
            })?;

        self.log_prefix.set_user(creds.account.clone());
        info!("{} Login successful", self.log_prefix);
        self.state = SessionState::Authenticated(creds);

        Ok(s::Response::Cond(s::CondResponse {
            cond: s::RespCondType::Ok,
            code: Some(s::RespTextCode::Capability(CAPABILITIES)),
            quip: Some(Cow::Borrowed("User login")),
        }))
    }
}
