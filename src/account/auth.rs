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

use std::collections::HashMap;

use log::warn;
use rand::{rngs::OsRng, Rng};
use secstr::SecStr;

use crate::support::error::Error;
use crate::support::system_config::UserConfig;

/// The identity a session authenticated as.
///
/// The password is retained so that the session can log in to other nodes
/// on the user's behalf.
#[derive(Clone, Debug)]
pub struct Credentials {
    /// The canonical account name.
    pub account: String,
    pub password: SecStr,
}

pub trait Authenticator: Send + Sync {
    fn authenticate(
        &self,
        user: &str,
        password: &[u8],
    ) -> Result<Credentials, Error>;
}

/// Authenticates against the users listed in the system configuration.
pub struct StaticAuthenticator {
    /// Keyed by lower-case user name; values are canonical name and encoded
    /// hash.
    users: HashMap<String, (String, String)>,
}

impl StaticAuthenticator {
    pub fn new(users: &[UserConfig]) -> Self {
        StaticAuthenticator {
            users: users
                .iter()
                .map(|u| {
                    (
                        u.name.to_lowercase(),
                        (u.name.clone(), u.password_hash.clone()),
                    )
                })
                .collect(),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(
        &self,
        user: &str,
        password: &[u8],
    ) -> Result<Credentials, Error> {
        let &(ref name, ref hash) = self
            .users
            .get(&user.to_lowercase())
            .ok_or(Error::AuthenticationFailed)?;

        match argon2::verify_encoded(hash, password) {
            Ok(true) => Ok(Credentials {
                account: name.clone(),
                password: SecStr::new(password.to_vec()),
            }),
            Ok(false) => Err(Error::AuthenticationFailed),
            Err(e) => {
                warn!("Unusable password hash for {}: {}", name, e);
                Err(Error::AuthenticationFailed)
            }
        }
    }
}

fn argon2_config() -> argon2::Config<'static> {
    argon2::Config {
        lanes: 1,
        mem_cost: 4096,
        thread_mode: argon2::ThreadMode::Sequential,
        time_cost: 10,
        variant: argon2::Variant::Argon2i,
        version: argon2::Version::Version13,
        ..argon2::Config::default()
    }
}

/// Produce an encoded hash of `password` for `[[users]].password_hash`.
pub fn hash_password(password: &[u8]) -> Result<String, argon2::Error> {
    let salt: [u8; 16] = OsRng.gen();
    argon2::hash_encoded(password, &salt, &argon2_config())
}
